//! Subject-to-scope cache.
//!
//! The only writable shared state of the pipeline. Entries expire after a
//! TTL and the map is bounded; when full, expired entries are dropped first
//! and then the oldest one. Duplicate resolution on a miss is harmless: all
//! writers store the same value.

use std::collections::HashMap;

use time::{Duration, OffsetDateTime};
use tokio::sync::RwLock;
use tracing::debug;

use crate::scope::SyncScope;

struct CacheEntry {
    scope: SyncScope,
    inserted_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

/// TTL + size bounded cache mapping token subject to sync scope.
pub struct ScopeCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ScopeCache {
    /// Creates a cache with the given entry TTL and size bound.
    #[must_use]
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Looks up a live entry for a subject.
    pub async fn get(&self, subject: &str) -> Option<SyncScope> {
        let now = OffsetDateTime::now_utc();
        let entries = self.entries.read().await;
        entries
            .get(subject)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.scope.clone())
    }

    /// Stores the scope for a subject, evicting when full.
    pub async fn insert(&self, subject: impl Into<String>, scope: SyncScope) {
        let subject = subject.into();
        let now = OffsetDateTime::now_utc();
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| entry.expires_at > now);
        if entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(subject, _)| subject.clone());
            if let Some(oldest) = oldest {
                debug!(subject = %oldest, "Evicting oldest scope cache entry");
                entries.remove(&oldest);
            }
        }

        entries.insert(
            subject,
            CacheEntry {
                scope,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Number of entries currently stored, expired included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the cache is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}
