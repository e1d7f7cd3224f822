use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::services::metrics_sink::MetricSeries;
use crate::services::query_analyzer::{
    AnalysisOptions, AnalysisResult, QueryParams, QueryPlan, TrendSnapshot,
};
use crate::services::query_analyzer::models::PlanSummary;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct AnalyzeRequest {
    /// SQL text with `:name` placeholders
    #[validate(length(min = 1, max = 100000))]
    pub query: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: QueryParams,
    #[serde(default)]
    pub options: AnalysisOptions,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ExplainRequest {
    #[validate(length(min = 1, max = 100000))]
    pub query: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub params: QueryParams,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnalyzeResponse {
    pub query_id: String,
    #[schema(value_type = Object)]
    pub analysis: Arc<AnalysisResult>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExplainResponse {
    pub query_id: String,
    #[schema(value_type = Object)]
    pub summary: PlanSummary,
    #[schema(value_type = Object)]
    pub plan: QueryPlan,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrendResponse {
    #[schema(value_type = Object)]
    pub trend: TrendSnapshot,
    pub anomalous_samples: usize,
    pub stable: bool,
}

/// One tracked query in the trends overview
#[derive(Debug, Serialize, ToSchema)]
pub struct QueryTrendSummary {
    #[schema(value_type = Object)]
    pub trend: TrendSnapshot,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TrendListResponse {
    pub queries: Vec<QueryTrendSummary>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MetricsResponse {
    pub series: Vec<MetricSeries>,
    pub trend_windows: usize,
}
