// Analyzer pipeline tests: cache short-circuit, admission, hints, trends,
// recommendations and failure classification against in-process fakes

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::config::AnalyzerConfig;
use crate::services::InMemoryMetricsSink;
use crate::services::maintenance_task::AnalysisMaintenanceTask;
use crate::services::query_analyzer::{
    AnalysisError, AnalysisOptions, ExecutionError, ExecutionStage, MetricKind, Priority,
    QueryFingerprint, QueryParams, RecommendationType,
};
use crate::tests::common::{
    FakeDatabase, Harness, UnavailableCache, index_scan_plan, insert_plan, rows, seq_scan_plan,
    test_config,
};
use crate::utils::ScheduledTask;

const QUERY: &str = "SELECT * FROM courses WHERE title LIKE :title";

fn params() -> QueryParams {
    [("title".to_string(), json!("%rust%"))].into_iter().collect()
}

fn no_cache() -> AnalysisOptions {
    AnalysisOptions { use_cache: false, ..AnalysisOptions::default() }
}

/// Cacheable query analyzed twice executes once
#[tokio::test]
async fn test_second_call_served_from_cache() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));

    let first = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();
    let second = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();

    assert_eq!(h.db.executions(), 1);
    assert_eq!(h.db.explains(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.cacheable);
    assert_eq!(h.metrics.counter_total("query.cache.hits"), 1.0);
    assert_eq!(h.metrics.counter_total("query.cache.misses"), 1.0);
    // a hit records no second trend sample
    assert_eq!(h.trends.durations(&first.query_id).len(), 1);
}

/// Layout and case differences share one cache entry
#[tokio::test]
async fn test_equivalent_text_hits_cache() {
    let h = Harness::new(FakeDatabase::new(index_scan_plan()));

    h.analyzer.analyze("SELECT id FROM courses", &QueryParams::new(), AnalysisOptions::default())
        .await
        .unwrap();
    h.analyzer
        .analyze("  select   ID\n from COURSES ", &QueryParams::new(), AnalysisOptions::default())
        .await
        .unwrap();

    assert_eq!(h.db.executions(), 1);
}

#[tokio::test]
async fn test_cache_disabled_always_executes() {
    let h = Harness::new(FakeDatabase::new(index_scan_plan()));

    for _ in 0..3 {
        h.analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();
    }

    assert_eq!(h.db.executions(), 3);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_seq_scan_analysis_contents() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));

    let result = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();

    assert_eq!(result.query_id, QueryFingerprint::of(QUERY));
    assert_eq!(result.recommendations.len(), 1);
    let rec = &result.recommendations[0];
    assert_eq!(rec.recommendation_type, RecommendationType::Index);
    assert_eq!(rec.priority, Priority::High);
    assert_eq!(rec.affected_objects, vec!["courses".to_string()]);
    assert!(result.requires_optimization);
    assert!(!result.slow);
    assert!(result.plan.is_some());
    assert_eq!(result.plan_summary.tables, vec!["courses".to_string()]);

    assert_eq!(result.metric("estimated_rows").map(|m| m.value), Some(50.0));
    assert_eq!(result.metric("sequential_scans").map(|m| m.value), Some(1.0));
    assert_eq!(result.metric("recommendation_count").map(|m| m.value), Some(1.0));
    assert!(result.metric("execution_time").is_some());
}

#[tokio::test]
async fn test_metrics_emitted_for_analysis() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));
    h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();

    let execution = h.metrics.events_named("query.execution");
    assert_eq!(execution.len(), 1);
    assert_eq!(execution[0].kind, MetricKind::Timer);
    assert_eq!(execution[0].tag("status"), Some("needs_optimization"));
    assert_eq!(execution[0].tag("type"), Some("reading"));

    assert_eq!(h.metrics.counter_total("query.scan.sequential"), 1.0);
    assert_eq!(h.metrics.counter_total("query.needs_optimization"), 1.0);
    assert_eq!(h.metrics.counter_total("query.scan.nested_loops"), 0.0);

    let optimization = h.metrics.events_named("query.optimization");
    assert_eq!(optimization.len(), 1);
    assert_eq!(optimization[0].tag("type"), Some("INDEX"));
    assert_eq!(optimization[0].tag("priority"), Some("HIGH"));

    let rows_gauge = h.metrics.events_named("query.plan.estimated_rows");
    assert_eq!(rows_gauge[0].value, 50.0);
    assert_eq!(h.metrics.events_named("query.result.size")[0].value, 1.0);
}

/// Slow executions are flagged and never cached
#[tokio::test]
async fn test_slow_query_not_cached() {
    let config = AnalyzerConfig { slow_query_threshold_ms: 10, ..test_config() };
    let h = Harness::with_config(
        FakeDatabase::new(index_scan_plan()).with_delay(Duration::from_millis(40)),
        config,
    );

    let result = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();
    assert!(result.slow);
    assert!(!result.cacheable);
    assert!(result.outcome.execution_time_ms >= 40);

    h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();
    assert_eq!(h.db.executions(), 2);
    assert!(h.cache.is_empty());
    assert_eq!(h.metrics.counter_total("query.slow"), 2.0);
}

#[tokio::test]
async fn test_large_estimate_not_cached() {
    // the plan estimates 50 rows
    let config = AnalyzerConfig { cache_max_rows: 50, ..test_config() };
    let h = Harness::with_config(FakeDatabase::new(seq_scan_plan()).with_rows(rows(5)), config);

    let result = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();

    assert!(!result.cacheable);
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_modifying_query_not_cached_and_not_read_only() {
    let h = Harness::new(FakeDatabase::new(insert_plan()));

    let result = h
        .analyzer
        .analyze("INSERT INTO courses (title) VALUES (:t)", &params(), AnalysisOptions::default())
        .await
        .unwrap();

    assert!(!result.cacheable);
    assert!(result.plan_summary.is_modifying);
    assert!(!h.db.hints().unwrap().read_only);
    assert_eq!(h.metrics.events_named("query.execution")[0].tag("type"), Some("modifying"));
}

#[tokio::test]
async fn test_execution_hints_follow_plan() {
    let config = AnalyzerConfig {
        cache_max_rows: 100,
        slow_query_threshold_ms: 500,
        expensive_query_timeout_secs: 30,
        ..test_config()
    };
    let expensive = json!({"Plan": {
        "Node Type": "Seq Scan",
        "Relation Name": "events",
        "Total Cost": 90000.0,
        "Plan Rows": 250000
    }});
    let h = Harness::with_config(FakeDatabase::new(expensive), config.clone());
    h.analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();

    let hints = h.db.hints().unwrap();
    assert_eq!(hints.fetch_size, Some(100));
    assert_eq!(hints.statement_timeout, Some(Duration::from_secs(30)));
    assert!(hints.read_only);

    let cheap = Harness::with_config(FakeDatabase::new(index_scan_plan()), config);
    cheap.analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();
    let hints = cheap.db.hints().unwrap();
    assert_eq!(hints.fetch_size, None);
    assert_eq!(hints.statement_timeout, None);
}

#[tokio::test]
async fn test_option_flags() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));
    let options = AnalysisOptions {
        use_cache: false,
        include_execution_plan: false,
        measure_performance: false,
        generate_recommendations: false,
    };

    let result = h.analyzer.analyze(QUERY, &params(), options).await.unwrap();

    assert!(result.plan.is_none());
    assert!(result.recommendations.is_empty());
    // a sequential scan needs optimization even when no advice was generated
    assert!(result.requires_optimization);
    assert!(h.trends.is_empty());
    assert!(h.metrics.events_named("query.execution").is_empty());
    // the summary is always present
    assert!(result.plan_summary.has_sequential_scan);
}

/// A slow history earns a caching recommendation on the next run
#[tokio::test]
async fn test_slow_history_recommends_caching() {
    let config = AnalyzerConfig {
        degradation_window_size: 3,
        degradation_threshold_ms: 5,
        ..test_config()
    };
    let h = Harness::with_config(
        FakeDatabase::new(index_scan_plan()).with_delay(Duration::from_millis(15)),
        config,
    );

    for _ in 0..3 {
        let result = h.analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();
        assert!(result.recommendations.is_empty());
    }

    let result = h.analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();
    assert_eq!(result.recommendations.len(), 1);
    assert_eq!(result.recommendations[0].recommendation_type, RecommendationType::Caching);
    assert_eq!(h.analyzer.trend_snapshot(&result.query_id).unwrap().sample_count, 4);
}

#[tokio::test]
async fn test_explain_only_does_not_execute() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));

    let plan = h.analyzer.explain_only(QUERY, &params()).await.unwrap();

    assert_eq!(plan.tables().to_vec(), vec!["courses".to_string()]);
    assert!(plan.has_sequential_scan());
    assert_eq!(h.db.executions(), 0);
    assert!(h.trends.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_unparseable_plan_is_classified() {
    let h = Harness::new(FakeDatabase::new(json!({"unexpected": true})));
    let mut params = params();
    params.insert("password".to_string(), json!("hunter2"));

    let err = h.analyzer.analyze(QUERY, &params, AnalysisOptions::default()).await.unwrap_err();

    assert!(matches!(err, AnalysisError::PlanParse { .. }));
    assert_eq!(err.kind(), "plan_parse");
    assert_eq!(err.fingerprint(), &QueryFingerprint::of(QUERY));
    assert_eq!(err.context().environment, "test");
    assert_eq!(err.context().parameters["password"], "******");
    assert_eq!(err.context().parameters["title"], "%rust%");
    assert_eq!(h.db.executions(), 0);

    let errors = h.metrics.events_named("query.error");
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].tag("kind"), Some("plan_parse"));
    assert_eq!(errors[0].tag("stage"), Some("parse"));
}

#[tokio::test]
async fn test_execution_timeout_is_classified() {
    let h = Harness::new(FakeDatabase::new(index_scan_plan()).fail_execute(|| {
        ExecutionError::Timeout("canceling statement due to statement timeout".into())
    }));

    let err = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap_err();

    match &err {
        AnalysisError::Execution { stage, source, .. } => {
            assert_eq!(*stage, ExecutionStage::Execute);
            assert!(matches!(source, ExecutionError::Timeout(_)));
        },
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(h.metrics.counter_total("query.timeout"), 1.0);
    assert_eq!(h.metrics.counter_total("query.error"), 1.0);
    assert!(h.trends.is_empty());
    assert!(h.cache.is_empty());
}

#[tokio::test]
async fn test_explain_lock_conflict_is_classified() {
    let h = Harness::new(
        FakeDatabase::new(index_scan_plan())
            .fail_explain(|| ExecutionError::LockConflict("deadlock detected".into())),
    );

    let err = h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap_err();

    assert_eq!(err.stage(), "explain");
    assert_eq!(err.kind(), "lock_conflict");
    assert_eq!(h.metrics.counter_total("query.lock_conflict"), 1.0);
    assert_eq!(h.db.executions(), 0);
}

#[tokio::test]
async fn test_error_message_tag_is_truncated() {
    let long = "x".repeat(500);
    let h = Harness::new(FakeDatabase::new(index_scan_plan()).fail_execute(|| {
        ExecutionError::Database("y".repeat(500))
    }));

    h.analyzer.analyze(&long, &QueryParams::new(), AnalysisOptions::default()).await.unwrap_err();

    let errors = h.metrics.events_named("query.error");
    let message = errors[0].tag("message").unwrap();
    assert_eq!(message.chars().count(), 100);
    assert!(message.ends_with("..."));
}

/// A broken cache never fails the analysis
#[tokio::test]
async fn test_unavailable_cache_is_bypassed() {
    let h = Harness::with_cache(FakeDatabase::new(index_scan_plan()), Arc::new(UnavailableCache));

    for _ in 0..2 {
        let result =
            h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();
        assert!(result.cacheable);
    }

    assert_eq!(h.db.executions(), 2);
}

/// Concurrent analyses of one query all land in its trend window
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_analyses_share_trend() {
    let h = Harness::new(FakeDatabase::new(index_scan_plan()));
    let mut handles = Vec::new();
    for _ in 0..16 {
        let analyzer = Arc::clone(&h.analyzer);
        handles.push(tokio::spawn(async move {
            analyzer.analyze(QUERY, &params(), no_cache()).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.trends.durations(&QueryFingerprint::of(QUERY)).len(), 16);
    assert_eq!(h.db.executions(), 16);
}

/// Cache lookups are counted per query
#[tokio::test]
async fn test_cache_counters_tagged_by_query() {
    let h = Harness::new(FakeDatabase::new(seq_scan_plan()));
    let query = QueryFingerprint::of(QUERY);

    for _ in 0..3 {
        h.analyzer.analyze(QUERY, &params(), AnalysisOptions::default()).await.unwrap();
    }
    h.analyzer.analyze("SELECT 2", &QueryParams::new(), AnalysisOptions::default()).await.unwrap();

    let count = |result: &str| {
        h.metrics.counter_value("query.cache", &[("query", query.short()), ("result", result)])
    };
    assert_eq!(count("hit"), 2.0);
    assert_eq!(count("miss"), 1.0);
    assert_eq!(h.metrics.counter_total("query.cache"), 4.0);
}

/// Many distinct queries cannot grow the metric series without limit
#[tokio::test]
async fn test_metric_series_stay_bounded() {
    let h = Harness::with_metrics(
        FakeDatabase::new(index_scan_plan()),
        InMemoryMetricsSink::new(0, 100),
    );

    for i in 0..200 {
        let query = format!("SELECT * FROM courses WHERE id = {}", i);
        h.analyzer.analyze(&query, &QueryParams::new(), no_cache()).await.unwrap();
    }

    assert!(h.metrics.series_count() <= 100);
    assert_eq!(h.trends.len(), 200);

    let maintenance = AnalysisMaintenanceTask::new(Arc::clone(&h.trends))
        .with_metrics(Arc::clone(&h.metrics), Duration::ZERO);
    maintenance.run().await.unwrap();
    assert_eq!(h.metrics.series_count(), 0);
}
