//! Rule Engine for optimization recommendations
//!
//! Evaluates every rule against a finished execution and collects the
//! recommendations in rule order. Evaluation is pure: the same plan,
//! outcome and trend snapshot always yield the same list.

use super::rules::{RecommendationRule, RuleContext, get_all_rules};
use super::trend_collector::TrendSnapshot;
use crate::services::query_analyzer::models::{
    ExecutionOutcome, OptimizationRecommendation, QueryPlan,
};

/// Rule engine configuration
#[derive(Debug, Clone)]
pub struct RuleEngineConfig {
    pub slow_query_threshold_ms: u64,
    /// Samples a trend needs before its rolling mean counts
    pub degradation_window_size: usize,
    pub degradation_threshold_ms: f64,
}

impl Default for RuleEngineConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_ms: 1000,
            degradation_window_size: 10,
            degradation_threshold_ms: 1000.0,
        }
    }
}

pub struct RuleEngine {
    config: RuleEngineConfig,
    rules: Vec<Box<dyn RecommendationRule>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(RuleEngineConfig::default())
    }
}

impl RuleEngine {
    pub fn new(config: RuleEngineConfig) -> Self {
        Self { config, rules: get_all_rules() }
    }

    pub fn config(&self) -> &RuleEngineConfig {
        &self.config
    }

    /// Run every rule; an empty list means nothing to recommend
    pub fn evaluate(
        &self,
        plan: &QueryPlan,
        outcome: &ExecutionOutcome,
        trend: Option<&TrendSnapshot>,
    ) -> Vec<OptimizationRecommendation> {
        let context = RuleContext { plan, outcome, trend, config: &self.config };

        self.rules
            .iter()
            .filter_map(|rule| {
                let recommendation = rule.evaluate(&context)?;
                tracing::debug!(
                    "Rule {} ({}) fired for query {}",
                    rule.id(),
                    rule.name(),
                    outcome.query_id.short()
                );
                Some(recommendation)
            })
            .collect()
    }
}
