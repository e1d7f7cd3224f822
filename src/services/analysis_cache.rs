//! In-memory analysis cache with TTL
//!
//! - Entries expire `ttl` after they were written
//! - At most `max_entries` live entries; the oldest is evicted first
//! - A poisoned lock reports `CacheError::Unavailable` instead of panicking

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::services::query_analyzer::{AnalysisCache, AnalysisResult, CacheError, QueryFingerprint};

// ============================================================================
// Cached Entry
// ============================================================================

#[derive(Debug, Clone)]
struct CachedAnalysis {
    result: Arc<AnalysisResult>,
    created_at: Instant,
}

impl CachedAnalysis {
    fn is_valid(&self, ttl: Duration) -> bool {
        self.created_at.elapsed() < ttl
    }
}

// ============================================================================
// Cache
// ============================================================================

pub struct MemoryAnalysisCache {
    entries: RwLock<HashMap<QueryFingerprint, CachedAnalysis>>,
    ttl: Duration,
    max_entries: usize,
}

impl MemoryAnalysisCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: RwLock::new(HashMap::new()), ttl, max_entries: max_entries.max(1) }
    }

    /// Drop expired entries, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            tracing::warn!("Analysis cache lock poisoned, skipping eviction");
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, cached| cached.is_valid(self.ttl));
        before - entries.len()
    }

    /// Number of stored entries, expired ones included
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAnalysisCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(600), 10_000)
    }
}

#[async_trait]
impl AnalysisCache for MemoryAnalysisCache {
    async fn get(
        &self,
        fingerprint: &QueryFingerprint,
    ) -> Result<Option<Arc<AnalysisResult>>, CacheError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| CacheError::Unavailable("analysis cache lock poisoned".to_string()))?;

        Ok(entries
            .get(fingerprint)
            .filter(|cached| cached.is_valid(self.ttl))
            .map(|cached| Arc::clone(&cached.result)))
    }

    async fn put(
        &self,
        fingerprint: &QueryFingerprint,
        result: Arc<AnalysisResult>,
    ) -> Result<(), CacheError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| CacheError::Unavailable("analysis cache lock poisoned".to_string()))?;

        if !entries.contains_key(fingerprint) && entries.len() >= self.max_entries {
            entries.retain(|_, cached| cached.is_valid(self.ttl));

            if entries.len() >= self.max_entries
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, cached)| cached.created_at)
                    .map(|(fp, _)| fp.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(fingerprint.clone(), CachedAnalysis { result, created_at: Instant::now() });
        Ok(())
    }
}
