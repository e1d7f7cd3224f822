//! Caching rules (CACHE001)

use super::*;
use crate::services::query_analyzer::models::{Priority, RecommendationType};

/// CACHE001: repeatedly slow query
/// Condition: this run took more than twice the slow threshold, or the
/// fingerprint's recent history already averages above the degradation
/// threshold
pub struct Cache001RepeatedlySlow;

impl Cache001RepeatedlySlow {
    fn slow_history(context: &RuleContext) -> Option<f64> {
        let trend = context.trend?;
        if trend.sample_count < context.config.degradation_window_size {
            return None;
        }
        trend.rolling_mean_ms.filter(|m| *m > context.config.degradation_threshold_ms)
    }
}

impl RecommendationRule for Cache001RepeatedlySlow {
    fn id(&self) -> &str {
        "CACHE001"
    }

    fn name(&self) -> &str {
        "Repeatedly slow query"
    }

    fn evaluate(&self, context: &RuleContext) -> Option<OptimizationRecommendation> {
        let limit = context.config.slow_query_threshold_ms.saturating_mul(2);
        let description = if context.outcome.execution_time_ms > limit {
            format!(
                "Query execution time {}ms is more than twice the {}ms slow threshold; consider caching its result",
                context.outcome.execution_time_ms, context.config.slow_query_threshold_ms
            )
        } else if let Some(mean) = Self::slow_history(context) {
            format!(
                "Recent executions average {:.0}ms; consider caching the result of this query",
                mean
            )
        } else {
            return None;
        };

        Some(OptimizationRecommendation::new(
            RecommendationType::Caching,
            description,
            context.plan.tables().to_vec(),
            Priority::Low,
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn RecommendationRule>> {
    vec![Box::new(Cache001RepeatedlySlow)]
}
