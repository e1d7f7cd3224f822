//! Diagnostic context attached to analysis failures
//!
//! Parameter values are redacted before they leave the analyzer: values of
//! keys that name a secret are replaced entirely, every other value is cut
//! to 50 characters.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::collaborators::QueryParams;
use crate::utils::StringExt;

const MAX_PARAM_VALUE_CHARS: usize = 50;
const MAX_QUERY_PREVIEW_CHARS: usize = 200;
const MASK: &str = "******";

const SENSITIVE_KEY_PARTS: &[&str] =
    &["password", "passwd", "secret", "token", "api_key", "apikey", "credential"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureContext {
    pub timestamp: DateTime<Utc>,
    pub parameters: BTreeMap<String, String>,
    pub environment: String,
    pub query_preview: String,
}

impl FailureContext {
    pub fn capture(query: &str, params: &QueryParams, environment: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            parameters: params.iter().map(|(k, v)| (k.clone(), mask_param(k, v))).collect(),
            environment: environment.to_string(),
            query_preview: query.trim().truncate_ellipsis(MAX_QUERY_PREVIEW_CHARS),
        }
    }

    pub fn to_log_string(&self) -> String {
        let params = self
            .parameters
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "at={} env={} params={{{}}} query=\"{}\"",
            self.timestamp.to_rfc3339(),
            self.environment,
            params,
            self.query_preview
        )
    }
}

/// Redacted rendering of one bound parameter
pub fn mask_param(key: &str, value: &Value) -> String {
    let key = key.to_lowercase();
    if SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part)) {
        return MASK.to_string();
    }

    let rendered = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    rendered.truncate_ellipsis(MAX_PARAM_VALUE_CHARS)
}
