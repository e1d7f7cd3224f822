//! Explain plan parser
//!
//! Reads JSON-format explain output into a `QueryPlan`.

pub mod error;
pub mod plan_parser;

pub use error::{PlanParseError, PlanParseResult};
pub use plan_parser::PlanParser;
