//! Cache admission: which analyses may be stored for reuse

use crate::services::query_analyzer::models::{ExecutionOutcome, QueryPlan};

#[derive(Debug, Clone, Copy)]
pub struct CachePolicyConfig {
    /// Plans estimating this many rows or more are never cached
    pub max_rows: u64,
}

impl Default for CachePolicyConfig {
    fn default() -> Self {
        Self { max_rows: 1000 }
    }
}

/// Small, fast, read-only results are admitted
pub fn is_cacheable(
    plan: &QueryPlan,
    outcome: &ExecutionOutcome,
    config: &CachePolicyConfig,
) -> bool {
    plan.estimated_rows() < config.max_rows && !outcome.is_slow() && !plan.is_modifying()
}
