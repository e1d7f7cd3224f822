//! Seams to the outside world
//!
//! The analyzer never talks to a database, cache or metrics backend
//! directly. It is handed trait objects for each, so the HTTP service wires
//! PostgreSQL and in-memory implementations while tests wire fakes.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::error::{CacheError, ExecutionError};
use super::fingerprint::QueryFingerprint;
use super::models::{AnalysisResult, ResultRows};

/// Named query parameters (`:name` placeholders)
pub type QueryParams = BTreeMap<String, Value>;

// ============================================================================
// Plan Provider / Query Executor
// ============================================================================

/// Produces the engine's JSON explain document for a query
#[async_trait]
pub trait PlanProvider: Send + Sync {
    async fn explain(&self, query: &str, params: &QueryParams) -> Result<Value, ExecutionError>;
}

/// Hints derived from the plan and forwarded to the executor
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionHints {
    /// Retain at most this many rows
    pub fetch_size: Option<u64>,
    pub statement_timeout: Option<Duration>,
    /// The plan does not modify data
    pub read_only: bool,
}

/// Runs the query itself
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        params: &QueryParams,
        hints: &ExecutionHints,
    ) -> Result<ResultRows, ExecutionError>;
}

// ============================================================================
// Analysis Cache
// ============================================================================

/// Store for finished analyses, keyed by fingerprint
///
/// Expiry is the store's concern; the analyzer only decides whether to write.
#[async_trait]
pub trait AnalysisCache: Send + Sync {
    async fn get(
        &self,
        fingerprint: &QueryFingerprint,
    ) -> Result<Option<Arc<AnalysisResult>>, CacheError>;

    async fn put(
        &self,
        fingerprint: &QueryFingerprint,
        result: Arc<AnalysisResult>,
    ) -> Result<(), CacheError>;
}

// ============================================================================
// Metrics Sink
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Timer,
}

/// One named measurement with its tag set
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEvent {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub tags: Vec<(String, String)>,
}

impl MetricEvent {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Accepts counters, gauges and timers
pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricEvent);

    fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        self.record(event(name, MetricKind::Counter, 1.0, tags));
    }

    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.record(event(name, MetricKind::Gauge, value, tags));
    }

    fn timer(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        self.record(event(name, MetricKind::Timer, elapsed.as_nanos() as f64 / 1_000_000.0, tags));
    }
}

fn event(name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) -> MetricEvent {
    MetricEvent {
        name: name.to_string(),
        kind,
        value,
        tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
    }
}
