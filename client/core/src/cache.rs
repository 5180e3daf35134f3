//! Result cache with lazy expiry

use crate::signals::SignalSet;
use crate::{BlockingMode, Decision};
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Requests with equal signals and mode share one cached decision
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub signals: SignalSet,
    pub mode: BlockingMode,
}

impl CacheKey {
    pub fn new(signals: SignalSet, mode: BlockingMode) -> Self {
        Self { signals, mode }
    }
}

#[derive(Debug, Clone)]
pub struct CachedDecision {
    pub decision: Decision,
    pub expires_at: Instant,
}

/// Decision cache. Entries are only checked for expiry when read.
pub struct ResultCache {
    entries: DashMap<CacheKey, CachedDecision>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Live entry for `key`; an expired entry is evicted and reported as absent
    pub fn get(&self, key: &CacheKey) -> Option<CachedDecision> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if now < entry.expires_at {
                return Some(entry.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| now >= entry.expires_at);
        None
    }

    /// Store `decision` for `ttl`, replacing any previous entry
    pub fn put(&self, key: CacheKey, decision: Decision, ttl: Duration) -> Instant {
        let expires_at = Instant::now() + ttl;
        self.entries.insert(key, CachedDecision { decision, expires_at });
        expires_at
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Stored entries, including expired ones not yet read
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}
