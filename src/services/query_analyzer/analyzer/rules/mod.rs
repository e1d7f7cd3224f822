//! Recommendation rules
//!
//! Each rule looks at one aspect of a finished execution and may produce a
//! single recommendation. Rules are independent; every matching rule fires.

pub mod caching;
pub mod index;
pub mod join;

use super::rule_engine::RuleEngineConfig;
use super::trend_collector::TrendSnapshot;
use crate::services::query_analyzer::models::{
    ExecutionOutcome, OptimizationRecommendation, QueryPlan,
};

/// Inputs available to every rule
pub struct RuleContext<'a> {
    pub plan: &'a QueryPlan,
    pub outcome: &'a ExecutionOutcome,
    /// History of this fingerprint before the current execution
    pub trend: Option<&'a TrendSnapshot>,
    pub config: &'a RuleEngineConfig,
}

pub trait RecommendationRule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn evaluate(&self, context: &RuleContext) -> Option<OptimizationRecommendation>;
}

/// All rules in evaluation order
pub fn get_all_rules() -> Vec<Box<dyn RecommendationRule>> {
    let mut rules: Vec<Box<dyn RecommendationRule>> = Vec::new();
    rules.extend(index::get_rules());
    rules.extend(join::get_rules());
    rules.extend(caching::get_rules());
    rules
}
