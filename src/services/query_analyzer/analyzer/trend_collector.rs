//! Trend Collector - per-fingerprint execution time windows
//!
//! ```text
//!  DashMap<QueryFingerprint, Arc<Mutex<TrendWindow>>>
//!        │ shard lock held only long enough to clone the Arc
//!        ▼
//!  Mutex<TrendWindow>   append -> prune(retention) -> degradation check
//! ```
//!
//! Mutation is serialized per fingerprint; unrelated fingerprints never wait
//! on each other's window. One collector is created at startup and shared
//! through `AppState`.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::distribution::{PerformanceDistribution, distribution};
use crate::services::query_analyzer::fingerprint::QueryFingerprint;

// ============================================================================
// Configuration
// ============================================================================

/// When a degraded window produces a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationAlertPolicy {
    /// Every append that leaves the window degraded
    #[default]
    EverySample,
    /// Only the append that moves the window from healthy to degraded
    OnTransition,
}

#[derive(Debug, Clone)]
pub struct TrendConfig {
    pub retention: chrono::Duration,
    /// Samples averaged by the degradation check
    pub window_size: usize,
    pub degradation_threshold_ms: f64,
    pub alert_policy: DegradationAlertPolicy,
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            retention: chrono::Duration::hours(24),
            window_size: 10,
            degradation_threshold_ms: 1000.0,
            alert_policy: DegradationAlertPolicy::EverySample,
        }
    }
}

// ============================================================================
// Window
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct TrendSample {
    duration_ms: f64,
    at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TrendWindow {
    samples: VecDeque<TrendSample>,
    degraded: bool,
    /// Set when a sweep unlinked this window from the map
    retired: bool,
}

impl TrendWindow {
    fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        self.samples.retain(|s| s.at >= cutoff);
        before - self.samples.len()
    }

    fn durations(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.duration_ms).collect()
    }

    /// Mean of the newest `window_size` samples once that many exist
    fn rolling_mean(&self, window_size: usize) -> Option<f64> {
        if window_size == 0 || self.samples.len() < window_size {
            return None;
        }
        let recent = self.samples.iter().rev().take(window_size);
        Some(recent.map(|s| s.duration_ms).sum::<f64>() / window_size as f64)
    }
}

// ============================================================================
// Results
// ============================================================================

/// Effect of one `record` call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendUpdate {
    pub sample_count: usize,
    pub rolling_mean_ms: Option<f64>,
    pub degraded: bool,
    /// A degradation warning was logged for this append
    pub alerted: bool,
}

/// Point-in-time view of one fingerprint's history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSnapshot {
    pub fingerprint: QueryFingerprint,
    pub sample_count: usize,
    pub distribution: PerformanceDistribution,
    pub rolling_mean_ms: Option<f64>,
    pub degraded: bool,
    pub first_sample_at: Option<DateTime<Utc>>,
    pub last_sample_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub pruned_samples: usize,
    pub dropped_windows: usize,
}

// ============================================================================
// Collector
// ============================================================================

pub struct TrendCollector {
    config: TrendConfig,
    windows: DashMap<QueryFingerprint, Arc<Mutex<TrendWindow>>>,
}

impl Default for TrendCollector {
    fn default() -> Self {
        Self::new(TrendConfig::default())
    }
}

impl TrendCollector {
    pub fn new(config: TrendConfig) -> Self {
        Self { config, windows: DashMap::new() }
    }

    pub fn config(&self) -> &TrendConfig {
        &self.config
    }

    /// Append a sample, prune expired ones, then check for degradation
    pub fn record(
        &self,
        fingerprint: &QueryFingerprint,
        duration_ms: f64,
        timestamp: DateTime<Utc>,
    ) -> TrendUpdate {
        loop {
            let handle = self.window_handle(fingerprint);
            let mut window = lock(&handle);
            // a sweep unlinked this window after the lookup; use the live one
            if window.retired {
                continue;
            }

            window.samples.push_back(TrendSample { duration_ms, at: timestamp });
            window.prune(self.cutoff(timestamp));

            let rolling_mean_ms = window.rolling_mean(self.config.window_size);
            let degraded =
                rolling_mean_ms.is_some_and(|m| m > self.config.degradation_threshold_ms);
            let alerted = match self.config.alert_policy {
                DegradationAlertPolicy::EverySample => degraded,
                DegradationAlertPolicy::OnTransition => degraded && !window.degraded,
            };
            window.degraded = degraded;

            if alerted && let Some(mean) = rolling_mean_ms {
                tracing::warn!(
                    "Performance degradation detected for query {}: mean of last {} runs {:.1}ms exceeds {:.0}ms",
                    fingerprint.short(),
                    self.config.window_size,
                    mean,
                    self.config.degradation_threshold_ms
                );
            }

            return TrendUpdate {
                sample_count: window.samples.len(),
                rolling_mean_ms,
                degraded,
                alerted,
            };
        }
    }

    /// Durations currently retained for a fingerprint, oldest first
    pub fn durations(&self, fingerprint: &QueryFingerprint) -> Vec<f64> {
        match self.existing_window(fingerprint) {
            Some(handle) => {
                let window = lock(&handle);
                window.durations()
            },
            None => Vec::new(),
        }
    }

    pub fn snapshot(&self, fingerprint: &QueryFingerprint) -> Option<TrendSnapshot> {
        let handle = self.existing_window(fingerprint)?;
        let window = lock(&handle);
        self.snapshot_of(fingerprint, &window)
    }

    /// Snapshot of every tracked fingerprint, ordered by fingerprint
    pub fn snapshots(&self) -> Vec<TrendSnapshot> {
        // clone the handles first so no shard lock is held while a window is locked
        let handles: Vec<_> = self
            .windows
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        let mut snapshots: Vec<_> = handles
            .iter()
            .filter_map(|(fingerprint, handle)| self.snapshot_of(fingerprint, &lock(handle)))
            .collect();
        snapshots.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        snapshots
    }

    /// Prune every window against `now` and drop the ones left empty
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let cutoff = self.cutoff(now);
        let mut stats = SweepStats::default();

        self.windows.retain(|_, handle| {
            let mut window = lock(handle);
            stats.pruned_samples += window.prune(cutoff);
            if window.samples.is_empty() {
                window.retired = true;
                stats.dropped_windows += 1;
                false
            } else {
                true
            }
        });

        stats
    }

    /// Number of fingerprints with a window
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn snapshot_of(
        &self,
        fingerprint: &QueryFingerprint,
        window: &TrendWindow,
    ) -> Option<TrendSnapshot> {
        if window.samples.is_empty() {
            return None;
        }

        Some(TrendSnapshot {
            fingerprint: fingerprint.clone(),
            sample_count: window.samples.len(),
            distribution: distribution(&window.durations()),
            rolling_mean_ms: window.rolling_mean(self.config.window_size),
            degraded: window.degraded,
            first_sample_at: window.samples.iter().map(|s| s.at).min(),
            last_sample_at: window.samples.iter().map(|s| s.at).max(),
        })
    }

    /// Oldest timestamp still inside retention
    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.config.retention).unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    fn existing_window(&self, fingerprint: &QueryFingerprint) -> Option<Arc<Mutex<TrendWindow>>> {
        self.windows.get(fingerprint).map(|w| Arc::clone(w.value()))
    }

    fn window_handle(&self, fingerprint: &QueryFingerprint) -> Arc<Mutex<TrendWindow>> {
        if let Some(handle) = self.existing_window(fingerprint) {
            return handle;
        }
        Arc::clone(self.windows.entry(fingerprint.clone()).or_default().value())
    }
}

fn lock(window: &Mutex<TrendWindow>) -> MutexGuard<'_, TrendWindow> {
    window.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn fp(query: &str) -> QueryFingerprint {
        QueryFingerprint::of(query)
    }

    #[test]
    fn test_degradation_fires_on_tenth_sample() {
        let collector = TrendCollector::default();
        let query = fp("SELECT * FROM courses");
        let start = Utc::now();

        for i in 0..9 {
            let update = collector.record(&query, 500.0, start + Duration::seconds(i));
            assert!(!update.degraded, "no verdict before the window is full");
            assert!(!update.alerted);
            assert_eq!(update.rolling_mean_ms, None);
        }

        let update = collector.record(&query, 6000.0, start + Duration::seconds(9));
        assert_eq!(update.sample_count, 10);
        assert_eq!(update.rolling_mean_ms, Some(1050.0));
        assert!(update.degraded);
        assert!(update.alerted);
    }

    #[test]
    fn test_window_full_but_below_threshold() {
        let collector = TrendCollector::default();
        let query = fp("SELECT 1");
        let now = Utc::now();

        for _ in 0..10 {
            collector.record(&query, 900.0, now);
        }
        let update = collector.record(&query, 1000.0, now);
        assert_eq!(update.rolling_mean_ms, Some(910.0));
        assert!(!update.degraded);
    }

    #[test]
    fn test_alert_policies() {
        let query = fp("SELECT * FROM slow_view");
        let now = Utc::now();

        let every = TrendCollector::default();
        let on_transition = TrendCollector::new(TrendConfig {
            alert_policy: DegradationAlertPolicy::OnTransition,
            ..Default::default()
        });

        let mut every_alerts = 0;
        let mut transition_alerts = 0;
        for _ in 0..15 {
            every_alerts += every.record(&query, 2000.0, now).alerted as usize;
            transition_alerts += on_transition.record(&query, 2000.0, now).alerted as usize;
        }

        assert_eq!(every_alerts, 6);
        assert_eq!(transition_alerts, 1);
    }

    #[test]
    fn test_retention_prunes_on_append() {
        let collector = TrendCollector::default();
        let query = fp("SELECT * FROM modules");
        let now = Utc::now();

        collector.record(&query, 10.0, now - Duration::hours(30));
        collector.record(&query, 20.0, now - Duration::hours(2));
        let update = collector.record(&query, 30.0, now);

        assert_eq!(update.sample_count, 2);
        assert_eq!(collector.durations(&query), vec![20.0, 30.0]);
    }

    #[test]
    fn test_snapshot() {
        let collector = TrendCollector::default();
        let query = fp("SELECT * FROM lessons");
        assert!(collector.snapshot(&query).is_none());

        let now = Utc::now();
        for d in [10.0, 20.0, 30.0] {
            collector.record(&query, d, now);
        }

        let snapshot = collector.snapshot(&query).unwrap();
        assert_eq!(snapshot.sample_count, 3);
        assert_eq!(snapshot.distribution.mean, 20.0);
        assert_eq!(snapshot.rolling_mean_ms, None);
        assert!(!snapshot.degraded);
        assert_eq!(snapshot.last_sample_at, Some(now));
    }

    #[test]
    fn test_snapshots_list_every_window() {
        let collector = TrendCollector::default();
        assert!(collector.snapshots().is_empty());

        let now = Utc::now();
        let queries = [fp("SELECT * FROM courses"), fp("SELECT * FROM modules")];
        for (i, query) in queries.iter().enumerate() {
            for _ in 0..=i {
                collector.record(query, 10.0, now);
            }
        }

        let snapshots = collector.snapshots();
        assert_eq!(snapshots.len(), 2);
        assert!(snapshots[0].fingerprint < snapshots[1].fingerprint);
        let total: usize = snapshots.iter().map(|s| s.sample_count).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_unbounded_retention_keeps_samples() {
        let collector = TrendCollector::new(TrendConfig {
            retention: chrono::Duration::MAX,
            ..TrendConfig::default()
        });
        let query = fp("SELECT 1");
        let now = Utc::now();

        collector.record(&query, 10.0, now - Duration::days(3650));
        let update = collector.record(&query, 20.0, now);

        assert_eq!(update.sample_count, 2);
        assert_eq!(collector.sweep(now), SweepStats::default());
        assert_eq!(collector.len(), 1);
    }

    #[test]
    fn test_sweep_drops_expired_windows() {
        let collector = TrendCollector::default();
        let now = Utc::now();
        let stale = fp("SELECT * FROM archive");
        let fresh = fp("SELECT * FROM courses");

        collector.record(&stale, 10.0, now - Duration::hours(48));
        collector.record(&fresh, 10.0, now);

        let stats = collector.sweep(now);
        assert_eq!(stats, SweepStats { pruned_samples: 1, dropped_windows: 1 });
        assert_eq!(collector.len(), 1);
        assert!(collector.snapshot(&stale).is_none());

        // a swept fingerprint starts a new window
        collector.record(&stale, 5.0, now);
        assert_eq!(collector.durations(&stale), vec![5.0]);
    }

    #[test]
    fn test_concurrent_records_on_shared_and_distinct_keys() {
        let collector = Arc::new(TrendCollector::default());
        let shared = fp("SELECT * FROM shared");
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let collector = Arc::clone(&collector);
                let shared = shared.clone();
                std::thread::spawn(move || {
                    let own = fp(&format!("SELECT * FROM t{}", t));
                    for i in 0..100 {
                        collector.record(&shared, i as f64, now);
                        collector.record(&own, i as f64, now);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(collector.durations(&shared).len(), 800);
        assert_eq!(collector.len(), 9);
    }
}
