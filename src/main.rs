use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use query_advisor::config::Config;
use query_advisor::services::query_analyzer::{
    AnalysisCache, MetricsSink, PlanProvider, QueryExecutor,
};
use query_advisor::services::{
    AnalysisMaintenanceTask, FanoutMetricsSink, InMemoryMetricsSink, MemoryAnalysisCache,
    PgPlanSource, QueryAnalyzer, TracingMetricsSink, TrendCollector, postgres,
    start_maintenance_task,
};
use query_advisor::{AppState, app_router, handlers, models, services};

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::query_analysis::analyze_query,
        handlers::query_analysis::explain_query,
        handlers::query_analysis::list_query_trends,
        handlers::query_analysis::get_query_trend,
        handlers::query_analysis::get_metrics,
    ),
    components(
        schemas(
            models::AnalyzeRequest,
            models::AnalyzeResponse,
            models::ExplainRequest,
            models::ExplainResponse,
            models::TrendResponse,
            models::TrendListResponse,
            models::QueryTrendSummary,
            models::MetricsResponse,
            services::MetricSeries,
            services::metrics_sink::MetricKindLabel,
            services::query_analyzer::AnalysisOptions,
        )
    ),
    tags(
        (name = "Query Analysis", description = "Query performance analysis and recommendations"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration first
    let config = Config::load()?;

    // Initialize logging
    let log_filter = tracing_subscriber::EnvFilter::new(&config.logging.level);
    let registry = tracing_subscriber::registry().with(log_filter);

    // Keeps the file writer flushing until main returns
    let mut _log_guard = None;
    if let Some(log_file) = &config.logging.file {
        let log_path = std::path::Path::new(log_file);
        if let Some(parent) = log_path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }

        let log_dir = log_path.parent().and_then(|p| p.to_str()).unwrap_or("logs");
        let file_name = log_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("query-advisor.log");
        // rolling appender adds a date suffix
        let file_prefix = file_name.strip_suffix(".log").unwrap_or(file_name);

        let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        _log_guard = Some(guard);
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
    tracing::info!("Query advisor starting up");
    tracing::info!("Configuration loaded successfully");

    let pool = postgres::create_pool(&config.database)?;
    tracing::info!("Database pool created (max_connections={})", config.database.max_connections);

    let plan_source = Arc::new(PgPlanSource::new(pool, config.analyzer.explain_analyze));
    let cache = Arc::new(MemoryAnalysisCache::new(
        std::time::Duration::from_secs(config.cache.ttl_secs),
        config.cache.max_entries,
    ));
    let metrics = Arc::new(InMemoryMetricsSink::new(
        config.metrics.recent_events,
        config.metrics.max_series,
    ));
    let sink: Arc<dyn MetricsSink> = Arc::new(FanoutMetricsSink::new(vec![
        Arc::clone(&metrics) as Arc<dyn MetricsSink>,
        Arc::new(TracingMetricsSink),
    ]));
    let trends = Arc::new(TrendCollector::new(config.analyzer.trend_config()));

    let analyzer = Arc::new(QueryAnalyzer::new(
        config.analyzer.clone(),
        Arc::clone(&plan_source) as Arc<dyn PlanProvider>,
        plan_source as Arc<dyn QueryExecutor>,
        Arc::clone(&cache) as Arc<dyn AnalysisCache>,
        sink,
        Arc::clone(&trends),
    ));
    tracing::info!(
        "Query analyzer initialized (slow threshold {}ms, environment '{}')",
        config.analyzer.slow_query_threshold_ms,
        config.analyzer.environment
    );

    if config.maintenance.enabled {
        let task = AnalysisMaintenanceTask::new(Arc::clone(&trends))
            .with_cache(Arc::clone(&cache))
            .with_metrics(
                Arc::clone(&metrics),
                std::time::Duration::from_secs(config.metrics.idle_secs),
            );
        let _maintenance_handle = start_maintenance_task(task, config.maintenance.interval_secs);
    } else {
        tracing::warn!("Analysis maintenance disabled by configuration");
    }

    let app_state = Arc::new(AppState { analyzer, trends, metrics });

    let app = app_router(app_state)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API documentation available at http://{}/api-docs", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
