//! JSON explain document -> QueryPlan
//!
//! Accepted shapes:
//!
//! ```text
//! [ { "Plan": { "Node Type": ..., "Plans": [ ... ] } } ]   (engine default)
//!   { "Plan": { "Node Type": ..., "Plans": [ ... ] } }
//! ```

use serde::Deserialize;
use serde_json::Value;

use super::error::{PlanParseError, PlanParseResult};
use crate::services::query_analyzer::models::{PlanNode, QueryPlan};

/// JSON nesting allowed before a document is rejected
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone)]
pub struct PlanParser {
    max_depth: usize,
}

impl Default for PlanParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanParser {
    pub fn new() -> Self {
        Self { max_depth: DEFAULT_MAX_DEPTH }
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Parse explain output given as text
    pub fn parse_str(&self, text: &str) -> PlanParseResult<QueryPlan> {
        let document: Value = serde_json::from_str(text.trim()).map_err(|source| {
            PlanParseError::InvalidJson { source, document: text.to_string() }
        })?;
        self.parse(&document)
    }

    /// Parse an explain document
    ///
    /// Fails instead of returning a partial plan: a missing or empty root,
    /// a non-numeric cost or row field, or a malformed `Plans` array all
    /// produce a `PlanParseError`.
    pub fn parse(&self, document: &Value) -> PlanParseResult<QueryPlan> {
        if json_depth(document) > self.max_depth {
            return Err(PlanParseError::TooDeep {
                max_depth: self.max_depth,
                document: document.to_string(),
            });
        }

        let root = Self::locate_root(document)
            .ok_or_else(|| PlanParseError::MissingPlan { document: document.to_string() })?;

        match root {
            Value::Null => {
                return Err(PlanParseError::MissingPlan { document: document.to_string() });
            },
            Value::Object(fields) if fields.is_empty() => {
                return Err(PlanParseError::EmptyPlan { document: document.to_string() });
            },
            _ => {},
        }

        let node = PlanNode::deserialize(root).map_err(|source| {
            PlanParseError::InvalidStructure { source, document: document.to_string() }
        })?;

        let plan = QueryPlan::from_root(node);
        tracing::debug!(
            "Parsed plan: root={}, tables={:?}, total_cost={:.2}",
            plan.root().node_type,
            plan.tables(),
            plan.total_cost()
        );
        Ok(plan)
    }

    fn locate_root(document: &Value) -> Option<&Value> {
        match document {
            Value::Array(items) => items.first().and_then(|item| item.get("Plan")),
            Value::Object(_) => document.get("Plan"),
            _ => None,
        }
    }
}

/// Nesting depth of a JSON value, computed without recursion
fn json_depth(value: &Value) -> usize {
    let mut max_depth = 0;
    let mut stack = vec![(value, 1usize)];

    while let Some((current, depth)) = stack.pop() {
        max_depth = max_depth.max(depth);
        match current {
            Value::Array(items) => stack.extend(items.iter().map(|v| (v, depth + 1))),
            Value::Object(fields) => stack.extend(fields.values().map(|v| (v, depth + 1))),
            _ => {},
        }
    }

    max_depth
}
