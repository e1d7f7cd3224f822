// Common test utilities: in-process fakes for the analyzer's collaborators

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::AppState;
use crate::config::AnalyzerConfig;
use crate::services::query_analyzer::{
    AnalysisCache, AnalysisResult, CacheError, ExecutionError, ExecutionHints, MetricsSink,
    PlanProvider, QueryExecutor, QueryFingerprint, QueryParams, ResultRows,
};
use crate::services::{InMemoryMetricsSink, MemoryAnalysisCache, QueryAnalyzer, TrendCollector};

// ============================================================================
// Plan documents
// ============================================================================

/// Single sequential scan over `courses`
pub fn seq_scan_plan() -> Value {
    json!([{"Plan": {
        "Node Type": "Seq Scan",
        "Relation Name": "courses",
        "Total Cost": 120.0,
        "Plan Rows": 50,
        "Actual Total Time": 45.2
    }}])
}

/// Index scan that triggers no rule
pub fn index_scan_plan() -> Value {
    json!([{"Plan": {
        "Node Type": "Index Scan",
        "Relation Name": "courses",
        "Total Cost": 8.3,
        "Plan Rows": 1,
        "Actual Total Time": 0.05
    }}])
}

pub fn insert_plan() -> Value {
    json!([{"Plan": {
        "Node Type": "ModifyTable",
        "Operation": "Insert",
        "Relation Name": "courses",
        "Total Cost": 0.01,
        "Plan Rows": 1
    }}])
}

pub fn rows(total: u64) -> ResultRows {
    ResultRows::Rows {
        columns: vec!["id".to_string()],
        rows: (0..total).map(|i| json!({"id": i})).collect(),
        total,
    }
}

// ============================================================================
// Fake database
// ============================================================================

type ErrorFactory = fn() -> ExecutionError;

/// Plan provider and executor backed by canned answers
pub struct FakeDatabase {
    plan: Mutex<Value>,
    rows: Mutex<ResultRows>,
    delay: Mutex<Duration>,
    explain_error: Mutex<Option<ErrorFactory>>,
    execute_error: Mutex<Option<ErrorFactory>>,
    pub explain_calls: AtomicUsize,
    pub execute_calls: AtomicUsize,
    pub last_hints: Mutex<Option<ExecutionHints>>,
}

impl FakeDatabase {
    pub fn new(plan: Value) -> Self {
        Self {
            plan: Mutex::new(plan),
            rows: Mutex::new(rows(1)),
            delay: Mutex::new(Duration::ZERO),
            explain_error: Mutex::new(None),
            execute_error: Mutex::new(None),
            explain_calls: AtomicUsize::new(0),
            execute_calls: AtomicUsize::new(0),
            last_hints: Mutex::new(None),
        }
    }

    pub fn with_rows(self, result: ResultRows) -> Self {
        *self.rows.lock().unwrap() = result;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }

    pub fn fail_explain(self, error: ErrorFactory) -> Self {
        *self.explain_error.lock().unwrap() = Some(error);
        self
    }

    pub fn fail_execute(self, error: ErrorFactory) -> Self {
        *self.execute_error.lock().unwrap() = Some(error);
        self
    }

    pub fn executions(&self) -> usize {
        self.execute_calls.load(Ordering::SeqCst)
    }

    pub fn explains(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    pub fn hints(&self) -> Option<ExecutionHints> {
        self.last_hints.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlanProvider for FakeDatabase {
    async fn explain(&self, _query: &str, _params: &QueryParams) -> Result<Value, ExecutionError> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = *self.explain_error.lock().unwrap() {
            return Err(error());
        }
        Ok(self.plan.lock().unwrap().clone())
    }
}

#[async_trait]
impl QueryExecutor for FakeDatabase {
    async fn execute(
        &self,
        _query: &str,
        _params: &QueryParams,
        hints: &ExecutionHints,
    ) -> Result<ResultRows, ExecutionError> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_hints.lock().unwrap() = Some(hints.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = *self.execute_error.lock().unwrap() {
            return Err(error());
        }
        Ok(self.rows.lock().unwrap().clone())
    }
}

// ============================================================================
// Caches
// ============================================================================

/// Cache whose backend is always down
pub struct UnavailableCache;

#[async_trait]
impl AnalysisCache for UnavailableCache {
    async fn get(
        &self,
        _fingerprint: &QueryFingerprint,
    ) -> Result<Option<Arc<AnalysisResult>>, CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }

    async fn put(
        &self,
        _fingerprint: &QueryFingerprint,
        _result: Arc<AnalysisResult>,
    ) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".to_string()))
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn test_config() -> AnalyzerConfig {
    AnalyzerConfig { environment: "test".to_string(), ..AnalyzerConfig::default() }
}

/// Analyzer plus handles on the state it writes to
pub struct Harness {
    pub db: Arc<FakeDatabase>,
    pub cache: Arc<MemoryAnalysisCache>,
    pub metrics: Arc<InMemoryMetricsSink>,
    pub trends: Arc<TrendCollector>,
    pub analyzer: Arc<QueryAnalyzer>,
}

impl Harness {
    pub fn new(db: FakeDatabase) -> Self {
        Self::with_config(db, test_config())
    }

    pub fn with_config(db: FakeDatabase, config: AnalyzerConfig) -> Self {
        let cache = Arc::new(MemoryAnalysisCache::default());
        Self::build(db, config, Arc::clone(&cache) as Arc<dyn AnalysisCache>, cache, None)
    }

    pub fn with_cache(db: FakeDatabase, cache: Arc<dyn AnalysisCache>) -> Self {
        Self::build(db, test_config(), cache, Arc::new(MemoryAnalysisCache::default()), None)
    }

    pub fn with_metrics(db: FakeDatabase, metrics: InMemoryMetricsSink) -> Self {
        let cache = Arc::new(MemoryAnalysisCache::default());
        let analysis_cache = Arc::clone(&cache) as Arc<dyn AnalysisCache>;
        Self::build(db, test_config(), analysis_cache, cache, Some(metrics))
    }

    fn build(
        db: FakeDatabase,
        config: AnalyzerConfig,
        analysis_cache: Arc<dyn AnalysisCache>,
        cache: Arc<MemoryAnalysisCache>,
        metrics: Option<InMemoryMetricsSink>,
    ) -> Self {
        let db = Arc::new(db);
        let metrics = Arc::new(metrics.unwrap_or_default());
        let trends = Arc::new(TrendCollector::new(config.trend_config()));
        let analyzer = Arc::new(QueryAnalyzer::new(
            config,
            Arc::clone(&db) as Arc<dyn PlanProvider>,
            Arc::clone(&db) as Arc<dyn QueryExecutor>,
            analysis_cache,
            Arc::clone(&metrics) as Arc<dyn MetricsSink>,
            Arc::clone(&trends),
        ));
        Self { db, cache, metrics, trends, analyzer }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState {
            analyzer: Arc::clone(&self.analyzer),
            trends: Arc::clone(&self.trends),
            metrics: Arc::clone(&self.metrics),
        })
    }
}
