//! Query Analyzer
//!
//! Turns a parameterized query into an analysis: plan, measured execution,
//! recommendations, trend update and metrics.
//!
//! ```text
//!  analyze(query, params, options)
//!     │
//!     ├─ fingerprint ──► AnalysisCache::get ──hit──► cached result (no other work)
//!     │                        │ miss / unavailable
//!     ├─ PlanProvider::explain ─► PlanParser ─► QueryPlan
//!     ├─ QueryExecutor::execute (timed, with ExecutionHints)
//!     ├─ RuleEngine ─► recommendations
//!     ├─ TrendCollector::record ─► degradation / anomaly warnings
//!     ├─ cache admission ─► AnalysisCache::put
//!     └─ MetricsSink
//! ```
//!
//! Any failure in explain, parse or execute becomes an `AnalysisError`
//! carrying the fingerprint and a redacted `FailureContext`.

pub mod analyzer;
pub mod collaborators;
pub mod context;
pub mod error;
pub mod fingerprint;
pub mod models;
pub mod parser;

pub use analyzer::{TrendCollector, TrendSnapshot};
pub use collaborators::{
    AnalysisCache, ExecutionHints, MetricEvent, MetricKind, MetricsSink, PlanProvider,
    QueryExecutor, QueryParams,
};
pub use context::FailureContext;
pub use error::{AnalysisError, AnalyzeResult, CacheError, ExecutionError, ExecutionStage};
pub use fingerprint::QueryFingerprint;
pub use models::{
    AnalysisOptions, AnalysisResult, ExecutionOutcome, MetricType, OptimizationRecommendation,
    PerformanceMetric, PlanNode, Priority, QueryPlan, RecommendationType, ResultRows,
};

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::AnalyzerConfig;
use crate::utils::StringExt;
use analyzer::{CachePolicyConfig, RuleEngine, detect_anomalies, distribution, is_cacheable};
use parser::PlanParser;

const MAX_ERROR_MESSAGE_CHARS: usize = 100;

pub struct QueryAnalyzer {
    config: AnalyzerConfig,
    parser: PlanParser,
    rule_engine: RuleEngine,
    cache_policy: CachePolicyConfig,
    plan_provider: Arc<dyn PlanProvider>,
    executor: Arc<dyn QueryExecutor>,
    cache: Arc<dyn AnalysisCache>,
    metrics: Arc<dyn MetricsSink>,
    trends: Arc<TrendCollector>,
}

impl QueryAnalyzer {
    pub fn new(
        config: AnalyzerConfig,
        plan_provider: Arc<dyn PlanProvider>,
        executor: Arc<dyn QueryExecutor>,
        cache: Arc<dyn AnalysisCache>,
        metrics: Arc<dyn MetricsSink>,
        trends: Arc<TrendCollector>,
    ) -> Self {
        Self {
            parser: PlanParser::new(),
            rule_engine: RuleEngine::new(config.rule_engine_config()),
            cache_policy: config.cache_policy_config(),
            config,
            plan_provider,
            executor,
            cache,
            metrics,
            trends,
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn trend_snapshot(&self, fingerprint: &QueryFingerprint) -> Option<TrendSnapshot> {
        self.trends.snapshot(fingerprint)
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Analyze a query, serving it from the cache when allowed
    pub async fn analyze(
        &self,
        query: &str,
        params: &QueryParams,
        options: AnalysisOptions,
    ) -> AnalyzeResult<Arc<AnalysisResult>> {
        let started = Instant::now();
        let fingerprint = QueryFingerprint::of(query);

        if options.use_cache
            && let Some(cached) = self.cache_lookup(&fingerprint).await
        {
            return Ok(cached);
        }

        self.run_analysis(query, params, &fingerprint, options, started)
            .await
            .inspect_err(|err| self.report_failure(err))
    }

    /// Explain and parse without executing the query
    pub async fn explain_only(
        &self,
        query: &str,
        params: &QueryParams,
    ) -> AnalyzeResult<QueryPlan> {
        let fingerprint = QueryFingerprint::of(query);
        self.acquire_plan(query, params, &fingerprint)
            .await
            .inspect_err(|err| self.report_failure(err))
    }

    // ========================================================================
    // Pipeline
    // ========================================================================

    async fn run_analysis(
        &self,
        query: &str,
        params: &QueryParams,
        fingerprint: &QueryFingerprint,
        options: AnalysisOptions,
        started: Instant,
    ) -> AnalyzeResult<Arc<AnalysisResult>> {
        let plan = Arc::new(self.acquire_plan(query, params, fingerprint).await?);

        let hints = self.execution_hints(&plan);
        let execution_started = Instant::now();
        let rows = self.executor.execute(query, params, &hints).await.map_err(|source| {
            AnalysisError::Execution {
                fingerprint: fingerprint.clone(),
                context: Box::new(self.failure_context(query, params)),
                stage: ExecutionStage::Execute,
                source,
            }
        })?;
        let execution_time_ms = execution_started.elapsed().as_millis() as u64;

        let outcome = ExecutionOutcome::new(
            fingerprint.clone(),
            rows,
            execution_time_ms,
            Arc::clone(&plan),
            self.config.slow_query_threshold_ms,
        );

        let recommendations = if options.generate_recommendations {
            let history = self.trends.snapshot(fingerprint);
            self.rule_engine.evaluate(&plan, &outcome, history.as_ref())
        } else {
            Vec::new()
        };
        let outcome = outcome.with_recommendations(recommendations.clone());

        if options.measure_performance {
            self.record_trend(fingerprint, &outcome);
        }

        let cacheable = is_cacheable(&plan, &outcome, &self.cache_policy);
        let result = Arc::new(AnalysisResult {
            query_id: fingerprint.clone(),
            plan: options.include_execution_plan.then(|| Arc::clone(&plan)),
            plan_summary: plan.summary(),
            metrics: Self::performance_metrics(&plan, &outcome),
            slow: outcome.is_slow(),
            requires_optimization: outcome.requires_optimization(),
            cacheable,
            recommendations,
            analysis_time_ms: started.elapsed().as_millis() as u64,
            timestamp: outcome.timestamp,
            outcome,
        });

        if options.use_cache
            && cacheable
            && let Err(e) = self.cache.put(fingerprint, Arc::clone(&result)).await
        {
            tracing::warn!("Failed to cache analysis for query {}: {}", fingerprint.short(), e);
        }

        if options.measure_performance {
            self.emit_metrics(&result, &plan);
        }

        if result.slow {
            tracing::warn!(
                "Slow query detected: {} took {}ms (threshold {}ms)",
                fingerprint.short(),
                execution_time_ms,
                self.config.slow_query_threshold_ms
            );
        } else {
            tracing::debug!(
                "Analyzed query {} in {}ms ({} recommendations)",
                fingerprint.short(),
                result.analysis_time_ms,
                result.recommendations.len()
            );
        }

        Ok(result)
    }

    async fn acquire_plan(
        &self,
        query: &str,
        params: &QueryParams,
        fingerprint: &QueryFingerprint,
    ) -> AnalyzeResult<QueryPlan> {
        let document = self.plan_provider.explain(query, params).await.map_err(|source| {
            AnalysisError::Execution {
                fingerprint: fingerprint.clone(),
                context: Box::new(self.failure_context(query, params)),
                stage: ExecutionStage::Explain,
                source,
            }
        })?;

        self.parser.parse(&document).map_err(|source| AnalysisError::PlanParse {
            fingerprint: fingerprint.clone(),
            context: Box::new(self.failure_context(query, params)),
            source,
        })
    }

    async fn cache_lookup(&self, fingerprint: &QueryFingerprint) -> Option<Arc<AnalysisResult>> {
        let query = fingerprint.short();
        match self.cache.get(fingerprint).await {
            Ok(Some(cached)) => {
                tracing::debug!("Analysis cache hit for query {}", query);
                self.metrics.increment("query.cache", &[("query", query), ("result", "hit")]);
                self.metrics.increment("query.cache.hits", &[]);
                Some(cached)
            },
            Ok(None) => {
                self.metrics.increment("query.cache", &[("query", query), ("result", "miss")]);
                self.metrics.increment("query.cache.misses", &[]);
                None
            },
            Err(e) => {
                tracing::warn!("{}; analyzing query {} without cache", e, query);
                None
            },
        }
    }

    fn execution_hints(&self, plan: &QueryPlan) -> ExecutionHints {
        let max_rows = self.config.cache_max_rows;
        ExecutionHints {
            fetch_size: (plan.estimated_rows() > max_rows).then_some(max_rows),
            statement_timeout: (plan.total_cost() > self.config.slow_query_threshold_ms as f64)
                .then(|| Duration::from_secs(self.config.expensive_query_timeout_secs)),
            read_only: !plan.is_modifying(),
        }
    }

    fn record_trend(&self, fingerprint: &QueryFingerprint, outcome: &ExecutionOutcome) {
        let duration_ms = outcome.execution_time_ms as f64;
        let update = self.trends.record(fingerprint, duration_ms, outcome.timestamp);

        // too few samples for a meaningful spread
        if update.sample_count < self.config.degradation_window_size {
            return;
        }

        let durations = self.trends.durations(fingerprint);
        if detect_anomalies(&durations, self.config.anomaly_sigma).contains(&duration_ms) {
            tracing::warn!(
                "Anomalous execution time for query {}: {}ms ({})",
                fingerprint.short(),
                outcome.execution_time_ms,
                distribution(&durations).report()
            );
        }
    }

    fn failure_context(&self, query: &str, params: &QueryParams) -> FailureContext {
        FailureContext::capture(query, params, &self.config.environment)
    }

    // ========================================================================
    // Metrics
    // ========================================================================

    fn performance_metrics(plan: &QueryPlan, outcome: &ExecutionOutcome) -> Vec<PerformanceMetric> {
        vec![
            PerformanceMetric::new(
                "execution_time",
                outcome.execution_time_ms as f64,
                "ms",
                MetricType::Timing,
            ),
            PerformanceMetric::new(
                "estimated_rows",
                plan.estimated_rows() as f64,
                "rows",
                MetricType::Size,
            ),
            PerformanceMetric::new(
                "recommendation_count",
                outcome.recommendations.len() as f64,
                "count",
                MetricType::Count,
            ),
            PerformanceMetric::new(
                "sequential_scans",
                plan.sequential_scan_tables().len() as f64,
                "count",
                MetricType::Count,
            ),
        ]
    }

    fn emit_metrics(&self, result: &AnalysisResult, plan: &QueryPlan) {
        let m = self.metrics.as_ref();
        let query = result.query_id.short();
        let status = if result.slow {
            "slow"
        } else if result.requires_optimization {
            "needs_optimization"
        } else {
            "normal"
        };
        let query_type = if plan.is_modifying() { "modifying" } else { "reading" };
        let tags = [("query", query)];

        m.timer(
            "query.execution",
            Duration::from_millis(result.outcome.execution_time_ms),
            &[("query", query), ("status", status), ("type", query_type)],
        );
        m.gauge("query.plan.estimated_rows", plan.estimated_rows() as f64, &tags);
        m.gauge("query.plan.total_cost", plan.total_cost(), &tags);
        m.gauge("query.plan.actual_time", plan.actual_time(), &tags);
        m.gauge("query.result.size", result.outcome.rows.count() as f64, &tags);

        if plan.has_sequential_scan() {
            m.increment("query.scan.sequential", &tags);
        }
        if plan.has_nested_loop() {
            m.increment("query.scan.nested_loops", &tags);
        }
        if result.slow {
            m.increment("query.slow", &tags);
        }
        if result.requires_optimization {
            m.increment("query.needs_optimization", &tags);
        }

        for rec in &result.recommendations {
            m.increment(
                "query.optimization",
                &[("type", rec.recommendation_type.as_str()), ("priority", rec.priority.as_str())],
            );
        }

        for metric in &result.metrics {
            m.gauge(
                &format!("query.analysis.{}", metric.name),
                metric.value,
                &[("query", query), ("unit", metric.unit.as_str())],
            );
        }
    }

    fn report_failure(&self, err: &AnalysisError) {
        tracing::error!("Query analysis failed: {} [{}]", err, err.context().to_log_string());

        let message = err.to_string().truncate_ellipsis(MAX_ERROR_MESSAGE_CHARS);
        self.metrics.increment(
            "query.error",
            &[
                ("query", err.fingerprint().short()),
                ("kind", err.kind()),
                ("stage", err.stage()),
                ("message", message.as_str()),
            ],
        );

        match err {
            AnalysisError::Execution { source: ExecutionError::Timeout(_), .. } => {
                self.metrics.increment("query.timeout", &[]);
            },
            AnalysisError::Execution { source: ExecutionError::LockConflict(_), .. } => {
                self.metrics.increment("query.lock_conflict", &[]);
            },
            _ => {},
        }
    }
}
