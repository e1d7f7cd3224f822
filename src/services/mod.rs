pub mod analysis_cache;
pub mod maintenance_task;
pub mod metrics_sink;
pub mod postgres;
pub mod query_analyzer;

pub use analysis_cache::MemoryAnalysisCache;
pub use maintenance_task::{AnalysisMaintenanceTask, start_maintenance_task};
pub use metrics_sink::{FanoutMetricsSink, InMemoryMetricsSink, MetricSeries, TracingMetricsSink};
pub use postgres::PgPlanSource;
pub use query_analyzer::{AnalysisError, QueryAnalyzer, TrendCollector};
