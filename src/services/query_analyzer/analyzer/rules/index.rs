//! Index rules (IDX001)

use super::*;
use crate::services::query_analyzer::models::{Priority, RecommendationType};

/// IDX001: sequential scan
/// Condition: some table is first accessed by a Seq Scan
pub struct Idx001SequentialScan;

impl RecommendationRule for Idx001SequentialScan {
    fn id(&self) -> &str {
        "IDX001"
    }

    fn name(&self) -> &str {
        "Sequential scan"
    }

    fn evaluate(&self, context: &RuleContext) -> Option<OptimizationRecommendation> {
        if !context.plan.has_sequential_scan() {
            return None;
        }

        Some(OptimizationRecommendation::new(
            RecommendationType::Index,
            "Consider adding indexes to avoid sequential scans",
            context.plan.sequential_scan_tables(),
            Priority::High,
        ))
    }
}

pub fn get_rules() -> Vec<Box<dyn RecommendationRule>> {
    vec![Box::new(Idx001SequentialScan)]
}
