//! Analysis stages that run after a plan has been parsed
//!
//! - `rule_engine` / `rules`: optimization recommendations
//! - `trend_collector` / `distribution`: execution time history
//! - `cache_policy`: cache admission

pub mod cache_policy;
pub mod distribution;
pub mod rule_engine;
pub mod rules;
pub mod trend_collector;

pub use cache_policy::{CachePolicyConfig, is_cacheable};
pub use distribution::{PerformanceDistribution, detect_anomalies, distribution};
pub use rule_engine::{RuleEngine, RuleEngineConfig};
pub use rules::{RecommendationRule, RuleContext};
pub use trend_collector::{
    DegradationAlertPolicy, SweepStats, TrendCollector, TrendConfig, TrendSnapshot, TrendUpdate,
};
