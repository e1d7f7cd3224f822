//! Metrics sinks
//!
//! - `TracingMetricsSink` writes each event to the log at debug level
//! - `InMemoryMetricsSink` aggregates series for the `/api/query/metrics` endpoint
//! - `FanoutMetricsSink` forwards to several sinks

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use utoipa::ToSchema;

use crate::services::query_analyzer::{MetricEvent, MetricKind, MetricsSink};

// ============================================================================
// Tracing
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, event: MetricEvent) {
        tracing::debug!(
            metric = %event.name,
            kind = ?event.kind,
            value = event.value,
            "{}",
            series_key(&event)
        );
    }
}

// ============================================================================
// In-memory aggregation
// ============================================================================

const DEFAULT_RECENT_EVENTS: usize = 1000;
const DEFAULT_MAX_SERIES: usize = 10_000;

/// Aggregate of one name + tag set
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MetricSeries {
    pub key: String,
    pub name: String,
    pub kind: MetricKindLabel,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
}

impl MetricSeries {
    pub fn mean(&self) -> f64 {
        if self.count == 0 { 0.0 } else { self.sum / self.count as f64 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MetricKindLabel {
    Counter,
    Gauge,
    Timer,
}

impl From<MetricKind> for MetricKindLabel {
    fn from(kind: MetricKind) -> Self {
        match kind {
            MetricKind::Counter => MetricKindLabel::Counter,
            MetricKind::Gauge => MetricKindLabel::Gauge,
            MetricKind::Timer => MetricKindLabel::Timer,
        }
    }
}

struct SeriesEntry {
    series: MetricSeries,
    touched: Instant,
    /// Update order, used to pick the least recently touched series
    seq: u64,
}

/// Series are keyed by name and full tag set, so per-query tags create one
/// series per query. The map is capped at `max_series` (least recently
/// touched series evicted first) and idle series are dropped by the
/// maintenance task through `evict_idle`.
pub struct InMemoryMetricsSink {
    series: DashMap<String, SeriesEntry>,
    max_series: usize,
    updates: AtomicU64,
    recent: Mutex<VecDeque<MetricEvent>>,
    recent_capacity: usize,
}

impl Default for InMemoryMetricsSink {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_EVENTS, DEFAULT_MAX_SERIES)
    }
}

impl InMemoryMetricsSink {
    pub fn new(recent_capacity: usize, max_series: usize) -> Self {
        Self {
            series: DashMap::new(),
            max_series: max_series.max(1),
            updates: AtomicU64::new(0),
            recent: Mutex::new(VecDeque::new()),
            recent_capacity,
        }
    }

    /// All series, ordered by key
    pub fn snapshot(&self) -> Vec<MetricSeries> {
        let mut series: Vec<_> = self.series.iter().map(|e| e.series.clone()).collect();
        series.sort_by(|a, b| a.key.cmp(&b.key));
        series
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Total of every counter series with this name, whatever its tags
    pub fn counter_total(&self, name: &str) -> f64 {
        self.series
            .iter()
            .filter(|e| e.series.name == name && e.series.kind == MetricKindLabel::Counter)
            .map(|e| e.series.sum)
            .sum()
    }

    /// Value of the counter with exactly this name and tag set
    pub fn counter_value(&self, name: &str, tags: &[(&str, &str)]) -> f64 {
        let key = format_key(name, tags.iter().map(|(k, v)| (*k, *v)));
        self.series
            .get(&key)
            .filter(|e| e.series.kind == MetricKindLabel::Counter)
            .map_or(0.0, |e| e.series.sum)
    }

    /// Most recent events, oldest first
    pub fn recent_events(&self) -> Vec<MetricEvent> {
        self.recent
            .lock()
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn events_named(&self, name: &str) -> Vec<MetricEvent> {
        self.recent_events().into_iter().filter(|e| e.name == name).collect()
    }

    /// Drop series not updated for at least `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let before = self.series.len();
        self.series.retain(|_, entry| entry.touched.elapsed() < max_idle);
        before.saturating_sub(self.series.len())
    }

    fn evict_least_recent(&self) {
        let oldest = self
            .series
            .iter()
            .min_by_key(|e| e.seq)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.series.remove(&key);
        }
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, event: MetricEvent) {
        let key = series_key(&event);
        let now = Instant::now();
        let seq = self.updates.fetch_add(1, Ordering::Relaxed);

        // concurrent inserts may overshoot the cap by a few series
        if !self.series.contains_key(&key) && self.series.len() >= self.max_series {
            self.evict_least_recent();
        }

        self.series
            .entry(key.clone())
            .and_modify(|e| {
                let s = &mut e.series;
                s.count += 1;
                s.sum += event.value;
                s.min = s.min.min(event.value);
                s.max = s.max.max(event.value);
                s.last = event.value;
                e.touched = now;
                e.seq = seq;
            })
            .or_insert_with(|| SeriesEntry {
                series: MetricSeries {
                    key,
                    name: event.name.clone(),
                    kind: event.kind.into(),
                    count: 1,
                    sum: event.value,
                    min: event.value,
                    max: event.value,
                    last: event.value,
                },
                touched: now,
                seq,
            });

        if self.recent_capacity == 0 {
            return;
        }
        if let Ok(mut recent) = self.recent.lock() {
            if recent.len() == self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(event);
        }
    }
}

// ============================================================================
// Fanout
// ============================================================================

pub struct FanoutMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl FanoutMetricsSink {
    pub fn new(sinks: Vec<Arc<dyn MetricsSink>>) -> Self {
        Self { sinks }
    }
}

impl MetricsSink for FanoutMetricsSink {
    fn record(&self, event: MetricEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

/// `name{k=v,...}` with tags sorted by key
fn series_key(event: &MetricEvent) -> String {
    format_key(&event.name, event.tags.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

fn format_key<'a>(name: &str, tags: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let mut tags: Vec<_> = tags.map(|(k, v)| format!("{}={}", k, v)).collect();
    if tags.is_empty() {
        return name.to_string();
    }
    tags.sort();
    format!("{}{{{}}}", name, tags.join(","))
}
