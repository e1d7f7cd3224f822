//! Join rules (JOIN001)

use super::*;
use crate::services::query_analyzer::models::{Priority, RecommendationType};

/// JOIN001: nested loop join
/// Condition: the plan contains a Nested Loop node
pub struct Join001NestedLoop;

impl RecommendationRule for Join001NestedLoop {
    fn id(&self) -> &str {
        "JOIN001"
    }

    fn name(&self) -> &str {
        "Nested loop join"
    }

    fn evaluate(&self, context: &RuleContext) -> Option<OptimizationRecommendation> {
        if !context.plan.has_nested_loop() {
            return None;
        }

        Some(OptimizationRecommendation::new(
            RecommendationType::Join,
            "Optimize join conditions to avoid nested loops",
            context.plan.nested_loop_tables().to_vec(),
            Priority::Medium,
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn RecommendationRule>> {
    vec![Box::new(Join001NestedLoop)]
}
