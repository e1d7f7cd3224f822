//! Query Advisor Library
//!
//! Query performance analysis: execution plan parsing, optimization
//! recommendations, execution time trends and result caching, served over HTTP.

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::{InMemoryMetricsSink, MemoryAnalysisCache, QueryAnalyzer, TrendCollector};

/// Application shared state
///
/// All services are wrapped in Arc for cheap cloning and thread safety.
#[derive(Clone)]
pub struct AppState {
    pub analyzer: Arc<QueryAnalyzer>,
    pub trends: Arc<TrendCollector>,
    pub metrics: Arc<InMemoryMetricsSink>,
}

/// Analysis routes plus `/health` and `/ready`
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/query/analyze", post(handlers::query_analysis::analyze_query))
        .route("/api/query/explain", post(handlers::query_analysis::explain_query))
        .route("/api/query/trends", get(handlers::query_analysis::list_query_trends))
        .route("/api/query/trends/:fingerprint", get(handlers::query_analysis::get_query_trend))
        .route("/api/query/metrics", get(handlers::query_analysis::get_metrics))
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "READY" }))
        .with_state(state)
}

#[cfg(test)]
mod tests;
