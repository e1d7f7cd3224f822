//! Query fingerprinting
//!
//! A fingerprint identifies a query independent of layout and letter case:
//! whitespace runs collapse to a single space, the text is trimmed and
//! lowercased, then hashed with SHA-256 and hex encoded. The fingerprint is
//! the key of both the analysis cache and the trend collector.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const SHORT_LEN: usize = 12;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Stable identifier of a normalized query
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    /// Fingerprint a raw query
    pub fn of(query: &str) -> Self {
        let normalized = Self::normalize(query);
        let digest = Sha256::digest(normalized.as_bytes());
        Self(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Collapse whitespace and lowercase
    pub fn normalize(query: &str) -> String {
        WHITESPACE_RE.replace_all(query.trim(), " ").to_lowercase()
    }

    /// Wrap an already computed fingerprint (e.g. from a URL path)
    pub fn from_hex(hex: impl Into<String>) -> Option<Self> {
        let hex = hex.into().to_ascii_lowercase();
        (hex.len() == 64 && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(Self(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short prefix for log lines and metric tags
    pub fn short(&self) -> &str {
        self.0.get(..SHORT_LEN).unwrap_or(&self.0)
    }
}

impl TryFrom<String> for QueryFingerprint {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(value).ok_or_else(|| "fingerprint must be 64 hex characters".to_string())
    }
}

impl From<QueryFingerprint> for String {
    fn from(fingerprint: QueryFingerprint) -> Self {
        fingerprint.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
