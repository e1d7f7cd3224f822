//! Query analysis data models
//!
//! Plan trees, execution outcomes, recommendations and the assembled
//! analysis result. Everything here is an immutable value once built; the
//! only process-wide state lives in the trend collector.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::fingerprint::QueryFingerprint;

pub const SEQ_SCAN: &str = "Seq Scan";
pub const NESTED_LOOP: &str = "Nested Loop";

/// Actual time may exceed the estimate by this factor before a plan stops being optimal
const OPTIMAL_TIME_TOLERANCE: f64 = 1.2;

// ============================================================================
// Plan Tree
// ============================================================================

/// One operator of a JSON-format explain tree
///
/// Field names follow the engine's explain output so a node serializes back
/// into the shape it was read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    #[serde(rename = "Node Type")]
    pub node_type: String,

    #[serde(rename = "Relation Name", default, skip_serializing_if = "Option::is_none")]
    pub relation_name: Option<String>,

    /// Set on ModifyTable nodes (Insert, Update, Delete, Merge)
    #[serde(rename = "Operation", default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,

    #[serde(rename = "Total Cost", default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,

    #[serde(rename = "Plan Rows", default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<f64>,

    #[serde(rename = "Actual Total Time", default, skip_serializing_if = "Option::is_none")]
    pub actual_time: Option<f64>,

    #[serde(rename = "Plans", default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Relation name, treating an empty string as absent
    pub fn relation(&self) -> Option<&str> {
        self.relation_name.as_deref().map(str::trim).filter(|r| !r.is_empty())
    }

    pub fn is_nested_loop(&self) -> bool {
        self.node_type == NESTED_LOOP
    }

    fn is_modifying(&self) -> bool {
        if let Some(op) = &self.operation
            && matches!(op.to_uppercase().as_str(), "INSERT" | "UPDATE" | "DELETE" | "MERGE")
        {
            return true;
        }

        let node_type = self.node_type.to_uppercase();
        ["INSERT", "UPDATE", "DELETE", "MODIFY", "MERGE"]
            .iter()
            .any(|kw| node_type.contains(kw))
            || ["CREATE", "ALTER", "DROP", "TRUNCATE"]
                .iter()
                .any(|kw| node_type.starts_with(kw))
    }
}

/// Parsed plan with aggregates computed once at construction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryPlan {
    root: PlanNode,
    total_cost: f64,
    actual_time: f64,
    estimated_rows: u64,
    /// Distinct relations in depth-first first-seen order
    tables: Vec<String>,
    /// Relation -> node type of the first node that mentions it
    scan_types: BTreeMap<String, String>,
    nested_loop_tables: Vec<String>,
    has_nested_loop: bool,
}

impl QueryPlan {
    /// Build a plan from its root, walking the tree once
    pub fn from_root(root: PlanNode) -> Self {
        let mut walk = PlanWalk::default();
        walk.visit(&root, false);

        Self {
            total_cost: root.cost.unwrap_or(0.0),
            actual_time: root.actual_time.unwrap_or(0.0),
            estimated_rows: root.rows.map(|r| r.max(0.0).round() as u64).unwrap_or(0),
            tables: walk.tables,
            scan_types: walk.scan_types,
            nested_loop_tables: walk.nested_loop_tables,
            has_nested_loop: walk.has_nested_loop,
            root,
        }
    }

    pub fn root(&self) -> &PlanNode {
        &self.root
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }

    pub fn actual_time(&self) -> f64 {
        self.actual_time
    }

    pub fn estimated_rows(&self) -> u64 {
        self.estimated_rows
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn scan_types(&self) -> &BTreeMap<String, String> {
        &self.scan_types
    }

    pub fn scan_type(&self, table: &str) -> Option<&str> {
        self.scan_types.get(table).map(String::as_str)
    }

    /// Relations found anywhere beneath a Nested Loop node
    pub fn nested_loop_tables(&self) -> &[String] {
        &self.nested_loop_tables
    }

    pub fn has_sequential_scan(&self) -> bool {
        self.scan_types.values().any(|t| t == SEQ_SCAN)
    }

    pub fn has_nested_loop(&self) -> bool {
        self.has_nested_loop
    }

    /// Tables whose first-seen access is a sequential scan, in table order
    pub fn sequential_scan_tables(&self) -> Vec<String> {
        self.tables
            .iter()
            .filter(|t| self.scan_type(t) == Some(SEQ_SCAN))
            .cloned()
            .collect()
    }

    /// Whether the root statement writes data or changes schema
    pub fn is_modifying(&self) -> bool {
        self.root.is_modifying()
    }

    pub fn is_optimal(&self) -> bool {
        !self.has_sequential_scan()
            && !self.has_nested_loop
            && self.actual_time <= self.total_cost * OPTIMAL_TIME_TOLERANCE
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            root_node_type: self.root.node_type.clone(),
            total_cost: self.total_cost,
            actual_time: self.actual_time,
            estimated_rows: self.estimated_rows,
            tables: self.tables.clone(),
            has_sequential_scan: self.has_sequential_scan(),
            has_nested_loop: self.has_nested_loop,
            is_modifying: self.is_modifying(),
            is_optimal: self.is_optimal(),
        }
    }
}

#[derive(Default)]
struct PlanWalk {
    tables: Vec<String>,
    seen: HashSet<String>,
    scan_types: BTreeMap<String, String>,
    nested_loop_tables: Vec<String>,
    nested_seen: HashSet<String>,
    has_nested_loop: bool,
}

impl PlanWalk {
    fn visit(&mut self, node: &PlanNode, under_nested_loop: bool) {
        let under_nested_loop = under_nested_loop || node.is_nested_loop();
        self.has_nested_loop |= node.is_nested_loop();

        if let Some(relation) = node.relation() {
            if self.seen.insert(relation.to_string()) {
                self.tables.push(relation.to_string());
            }
            self.scan_types
                .entry(relation.to_string())
                .or_insert_with(|| node.node_type.clone());
            if under_nested_loop && self.nested_seen.insert(relation.to_string()) {
                self.nested_loop_tables.push(relation.to_string());
            }
        }

        for child in &node.children {
            self.visit(child, under_nested_loop);
        }
    }
}

/// Flat view of a plan, always present in analysis results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub root_node_type: String,
    pub total_cost: f64,
    pub actual_time: f64,
    pub estimated_rows: u64,
    pub tables: Vec<String>,
    pub has_sequential_scan: bool,
    pub has_nested_loop: bool,
    pub is_modifying: bool,
    pub is_optimal: bool,
}

// ============================================================================
// Execution Outcome
// ============================================================================

/// Rows returned by the executor, or only a count when rows are not retained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultRows {
    /// `rows` may be capped by the fetch-size hint; `total` counts every row
    Rows { columns: Vec<String>, rows: Vec<serde_json::Value>, total: u64 },
    Count { affected: u64 },
}

impl ResultRows {
    pub fn count(&self) -> u64 {
        match self {
            ResultRows::Rows { total, .. } => *total,
            ResultRows::Count { affected } => *affected,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub query_id: QueryFingerprint,
    pub rows: ResultRows,
    pub execution_time_ms: u64,
    #[serde(skip)]
    pub plan: Arc<QueryPlan>,
    pub timestamp: DateTime<Utc>,
    pub recommendations: Vec<OptimizationRecommendation>,
    #[serde(skip)]
    slow_threshold_ms: u64,
}

impl ExecutionOutcome {
    pub fn new(
        query_id: QueryFingerprint,
        rows: ResultRows,
        execution_time_ms: u64,
        plan: Arc<QueryPlan>,
        slow_threshold_ms: u64,
    ) -> Self {
        Self {
            query_id,
            rows,
            execution_time_ms,
            plan,
            timestamp: Utc::now(),
            recommendations: Vec::new(),
            slow_threshold_ms,
        }
    }

    pub fn with_recommendations(
        mut self,
        recommendations: Vec<OptimizationRecommendation>,
    ) -> Self {
        self.recommendations = recommendations;
        self
    }

    pub fn is_slow(&self) -> bool {
        self.execution_time_ms > self.slow_threshold_ms
    }

    pub fn requires_optimization(&self) -> bool {
        !self.recommendations.is_empty()
            || self.plan.has_sequential_scan()
            || self.plan.has_nested_loop()
    }
}

// ============================================================================
// Recommendations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationType {
    Index,
    Join,
    Caching,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendationType::Index => "INDEX",
            RecommendationType::Join => "JOIN",
            RecommendationType::Caching => "CACHING",
        }
    }
}

/// Priority, ordered so that `High > Medium > Low`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    #[serde(rename = "type")]
    pub recommendation_type: RecommendationType,
    pub description: String,
    pub affected_objects: Vec<String>,
    pub priority: Priority,
}

impl OptimizationRecommendation {
    pub fn new(
        recommendation_type: RecommendationType,
        description: impl Into<String>,
        affected_objects: Vec<String>,
        priority: Priority,
    ) -> Self {
        Self { recommendation_type, description: description.into(), affected_objects, priority }
    }
}

// ============================================================================
// Metrics
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    Timing,
    Size,
    Count,
}

/// A measurement produced by one analysis
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceMetric {
    pub name: String,
    pub value: f64,
    pub unit: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub timestamp: DateTime<Utc>,
}

impl PerformanceMetric {
    pub fn new(name: &str, value: f64, unit: &str, metric_type: MetricType) -> Self {
        Self {
            name: name.to_string(),
            value,
            unit: unit.to_string(),
            metric_type,
            timestamp: Utc::now(),
        }
    }
}

// ============================================================================
// Options and Result
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Serve and store results through the analysis cache
    pub use_cache: bool,
    /// Include the full plan tree in the serialized result
    pub include_execution_plan: bool,
    /// Record trend samples and emit metrics
    pub measure_performance: bool,
    pub generate_recommendations: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            include_execution_plan: true,
            measure_performance: true,
            generate_recommendations: true,
        }
    }
}

/// Everything one `analyze` call produced
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub query_id: QueryFingerprint,
    pub outcome: ExecutionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<Arc<QueryPlan>>,
    pub plan_summary: PlanSummary,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub metrics: Vec<PerformanceMetric>,
    pub slow: bool,
    pub requires_optimization: bool,
    pub cacheable: bool,
    pub analysis_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn metric(&self, name: &str) -> Option<&PerformanceMetric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}
