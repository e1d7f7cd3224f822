//! Analysis Maintenance Task
//!
//! Periodic housekeeping for the in-memory state the analyzer accumulates:
//! drops trend samples past retention, expired cache entries and metric
//! series that have gone idle.

use chrono::Utc;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing::{debug, info};

use crate::services::analysis_cache::MemoryAnalysisCache;
use crate::services::metrics_sink::InMemoryMetricsSink;
use crate::services::query_analyzer::TrendCollector;
use crate::utils::{ScheduledExecutor, ScheduledTask};

pub struct AnalysisMaintenanceTask {
    trends: Arc<TrendCollector>,
    cache: Option<Arc<MemoryAnalysisCache>>,
    metrics: Option<(Arc<InMemoryMetricsSink>, Duration)>,
}

impl AnalysisMaintenanceTask {
    pub fn new(trends: Arc<TrendCollector>) -> Self {
        Self { trends, cache: None, metrics: None }
    }

    pub fn with_cache(mut self, cache: Arc<MemoryAnalysisCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Drop metric series idle for at least `max_idle`
    pub fn with_metrics(mut self, metrics: Arc<InMemoryMetricsSink>, max_idle: Duration) -> Self {
        self.metrics = Some((metrics, max_idle));
        self
    }

    async fn execute(&self) -> Result<(), anyhow::Error> {
        let stats = self.trends.sweep(Utc::now());
        let evicted = self.cache.as_ref().map_or(0, |c| c.evict_expired());
        let idle_series = self.metrics.as_ref().map_or(0, |(m, idle)| m.evict_idle(*idle));

        let cleaned = stats.pruned_samples + stats.dropped_windows + evicted + idle_series;
        if cleaned > 0 {
            info!(
                "Analysis maintenance: pruned {} trend samples, dropped {} windows, evicted {} cache entries, {} idle metric series",
                stats.pruned_samples, stats.dropped_windows, evicted, idle_series
            );
        } else {
            debug!(
                "Analysis maintenance: nothing to clean ({} live trend windows)",
                self.trends.len()
            );
        }

        Ok(())
    }
}

impl ScheduledTask for AnalysisMaintenanceTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move { self.execute().await })
    }
}

/// Spawn the maintenance loop; setting the returned flag stops it
pub fn start_maintenance_task(
    task: AnalysisMaintenanceTask,
    interval_secs: u64,
) -> Arc<AtomicBool> {
    let executor =
        ScheduledExecutor::new("analysis-maintenance", Duration::from_secs(interval_secs));
    let shutdown_handle = executor.shutdown_handle();

    tokio::spawn(async move {
        executor.start(task).await;
    });

    info!("Analysis maintenance task started with interval: {}s", interval_secs);
    shutdown_handle
}
