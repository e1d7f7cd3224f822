//! Failure taxonomy of the analyzer
//!
//! ```text
//! AnalysisError
//!   ├── PlanParse   malformed or missing plan document
//!   └── Execution   explain or execute failed in the database
//!                     (timeout | lock_conflict | syntax | connection | database)
//! CacheError::Unavailable   never surfaces to callers; the analysis
//!                           proceeds without the cache
//! ```

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use super::context::FailureContext;
use super::fingerprint::QueryFingerprint;
use super::parser::PlanParseError;

/// Failure reported by the plan provider or the query executor
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Query timed out: {0}")]
    Timeout(String),

    #[error("Lock conflict: {0}")]
    LockConflict(String),

    #[error("Syntax error: {0}")]
    Syntax(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl ExecutionError {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionError::Timeout(_) => "timeout",
            ExecutionError::LockConflict(_) => "lock_conflict",
            ExecutionError::Syntax(_) => "syntax",
            ExecutionError::Connection(_) => "connection",
            ExecutionError::Database(_) => "database",
        }
    }
}

/// Failure of the cache collaborator
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Which collaborator call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Explain,
    Execute,
}

impl fmt::Display for ExecutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStage::Explain => f.write_str("explain"),
            ExecutionStage::Execute => f.write_str("execute"),
        }
    }
}

/// Classified failure of one `analyze` or `explain_only` call
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Plan parse failed for query {fingerprint}: {source}")]
    PlanParse {
        fingerprint: QueryFingerprint,
        context: Box<FailureContext>,
        #[source]
        source: PlanParseError,
    },

    #[error("Query {stage} failed for {fingerprint}: {source}")]
    Execution {
        fingerprint: QueryFingerprint,
        context: Box<FailureContext>,
        stage: ExecutionStage,
        #[source]
        source: ExecutionError,
    },
}

impl AnalysisError {
    pub fn fingerprint(&self) -> &QueryFingerprint {
        match self {
            AnalysisError::PlanParse { fingerprint, .. }
            | AnalysisError::Execution { fingerprint, .. } => fingerprint,
        }
    }

    pub fn context(&self) -> &FailureContext {
        match self {
            AnalysisError::PlanParse { context, .. } | AnalysisError::Execution { context, .. } => {
                context
            },
        }
    }

    /// Short label used in metric tags and error codes
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::PlanParse { .. } => "plan_parse",
            AnalysisError::Execution { source, .. } => source.kind(),
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            AnalysisError::PlanParse { .. } => "parse",
            AnalysisError::Execution { stage: ExecutionStage::Explain, .. } => "explain",
            AnalysisError::Execution { stage: ExecutionStage::Execute, .. } => "execute",
        }
    }
}

/// Result alias for analyzer entry points
pub type AnalyzeResult<T> = Result<T, AnalysisError>;
