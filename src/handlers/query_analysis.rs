use axum::{
    Json,
    extract::{Path, State},
};
use std::sync::Arc;
use validator::Validate;

use crate::AppState;
use crate::models::{
    AnalyzeRequest, AnalyzeResponse, ExplainRequest, ExplainResponse, MetricsResponse,
    QueryTrendSummary, TrendListResponse, TrendResponse,
};
use crate::services::query_analyzer::QueryFingerprint;
use crate::services::query_analyzer::analyzer::detect_anomalies;
use crate::utils::{ApiError, ApiResult, StringExt};

/// Largest coefficient of variation a trend may show and still count as stable
const STABLE_CV: f64 = 0.2;

fn non_blank(query: &str) -> ApiResult<String> {
    query.clean().ok_or_else(|| ApiError::validation_error("Query must not be blank"))
}

// Analyze a query: plan, execution, recommendations
#[utoipa::path(
    post,
    path = "/api/query/analyze",
    request_body = AnalyzeRequest,
    responses(
        (status = 200, description = "Analysis result", body = AnalyzeResponse),
        (status = 400, description = "Invalid request or query syntax"),
        (status = 409, description = "Lock conflict"),
        (status = 422, description = "Plan could not be parsed"),
        (status = 502, description = "Database failure"),
        (status = 504, description = "Query timed out")
    ),
    tag = "Query Analysis"
)]
pub async fn analyze_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> ApiResult<Json<AnalyzeResponse>> {
    request.validate()?;
    let query = non_blank(&request.query)?;

    let analysis = state.analyzer.analyze(&query, &request.params, request.options).await?;

    Ok(Json(AnalyzeResponse { query_id: analysis.query_id.to_string(), analysis }))
}

// Explain a query without executing it
#[utoipa::path(
    post,
    path = "/api/query/explain",
    request_body = ExplainRequest,
    responses(
        (status = 200, description = "Parsed execution plan", body = ExplainResponse),
        (status = 400, description = "Invalid request or query syntax"),
        (status = 422, description = "Plan could not be parsed"),
        (status = 502, description = "Database failure")
    ),
    tag = "Query Analysis"
)]
pub async fn explain_query(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExplainRequest>,
) -> ApiResult<Json<ExplainResponse>> {
    request.validate()?;
    let query = non_blank(&request.query)?;

    let plan = state.analyzer.explain_only(&query, &request.params).await?;

    Ok(Json(ExplainResponse {
        query_id: QueryFingerprint::of(&query).to_string(),
        summary: plan.summary(),
        plan,
    }))
}

// Every tracked query with its execution statistics and cache usage
#[utoipa::path(
    get,
    path = "/api/query/trends",
    responses(
        (status = 200, description = "Tracked queries", body = TrendListResponse)
    ),
    tag = "Query Analysis"
)]
pub async fn list_query_trends(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TrendListResponse>> {
    let queries: Vec<_> = state
        .trends
        .snapshots()
        .into_iter()
        .map(|trend| {
            let query = trend.fingerprint.short();
            let cache_count = |result: &str| {
                state.metrics.counter_value("query.cache", &[("query", query), ("result", result)])
                    as u64
            };
            let cache_hits = cache_count("hit");
            let cache_misses = cache_count("miss");
            QueryTrendSummary { trend, cache_hits, cache_misses }
        })
        .collect();

    Ok(Json(TrendListResponse { total: queries.len(), queries }))
}

// Execution time history of one query
#[utoipa::path(
    get,
    path = "/api/query/trends/{fingerprint}",
    params(
        ("fingerprint" = String, Path, description = "64 hex character query fingerprint")
    ),
    responses(
        (status = 200, description = "Trend snapshot", body = TrendResponse),
        (status = 400, description = "Malformed fingerprint"),
        (status = 404, description = "No samples for this fingerprint")
    ),
    tag = "Query Analysis"
)]
pub async fn get_query_trend(
    State(state): State<Arc<AppState>>,
    Path(fingerprint): Path<String>,
) -> ApiResult<Json<TrendResponse>> {
    let fingerprint = QueryFingerprint::from_hex(fingerprint)
        .ok_or_else(|| ApiError::validation_error("Fingerprint must be 64 hex characters"))?;

    let trend = state
        .analyzer
        .trend_snapshot(&fingerprint)
        .ok_or_else(|| ApiError::not_found(format!("No samples for query {}", fingerprint)))?;

    let durations = state.trends.durations(&fingerprint);
    let anomalous_samples =
        detect_anomalies(&durations, state.analyzer.config().anomaly_sigma).len();

    Ok(Json(TrendResponse {
        stable: trend.distribution.is_stable(STABLE_CV),
        anomalous_samples,
        trend,
    }))
}

// Aggregated analyzer metrics
#[utoipa::path(
    get,
    path = "/api/query/metrics",
    responses(
        (status = 200, description = "Metric series", body = MetricsResponse)
    ),
    tag = "Query Analysis"
)]
pub async fn get_metrics(State(state): State<Arc<AppState>>) -> ApiResult<Json<MetricsResponse>> {
    Ok(Json(MetricsResponse {
        series: state.metrics.snapshot(),
        trend_windows: state.trends.len(),
    }))
}
