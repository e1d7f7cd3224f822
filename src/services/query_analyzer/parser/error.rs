//! Plan parser error types

use thiserror::Error;

/// Errors raised while turning an explain document into a `QueryPlan`
///
/// Every variant keeps the raw document for diagnosis.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("Invalid plan JSON: {source}")]
    InvalidJson {
        #[source]
        source: serde_json::Error,
        document: String,
    },

    #[error("Plan document has no \"Plan\" root")]
    MissingPlan { document: String },

    #[error("Root plan node is empty")]
    EmptyPlan { document: String },

    #[error("Invalid plan structure: {source}")]
    InvalidStructure {
        #[source]
        source: serde_json::Error,
        document: String,
    },

    #[error("Plan nesting exceeds {max_depth} levels")]
    TooDeep { max_depth: usize, document: String },
}

impl PlanParseError {
    /// The document that failed to parse
    pub fn document(&self) -> &str {
        match self {
            PlanParseError::InvalidJson { document, .. }
            | PlanParseError::MissingPlan { document }
            | PlanParseError::EmptyPlan { document }
            | PlanParseError::InvalidStructure { document, .. }
            | PlanParseError::TooDeep { document, .. } => document,
        }
    }
}

/// Result type alias for plan parsing
pub type PlanParseResult<T> = Result<T, PlanParseError>;
