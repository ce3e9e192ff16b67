use std::num::NonZeroUsize;
use std::sync::Arc;

use log::debug;
use lru::LruCache;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use super::types::FetchFingerprint;
use crate::normalize::SwapEvent;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub events: Arc<[SwapEvent]>,
    pub inserted_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() < ttl
    }
}

/// Fetch results keyed by fingerprint, bounded by capacity and expired by TTL.
#[derive(Debug)]
pub struct TransactionCache {
    entries: RwLock<LruCache<FetchFingerprint, CacheEntry>>,
    ttl: Duration,
}

impl Default for TransactionCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL)
    }
}

impl TransactionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &FetchFingerprint) -> Option<Arc<[SwapEvent]>> {
        {
            let entries = self.entries.read().await;
            match entries.peek(key) {
                Some(entry) if entry.is_fresh(self.ttl) => return Some(entry.events.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Re-check under the write lock; a concurrent insert may have refreshed it.
        let mut entries = self.entries.write().await;
        match entries.peek(key) {
            Some(entry) if entry.is_fresh(self.ttl) => Some(entry.events.clone()),
            Some(_) => {
                debug!("cache entry {} expired", key);
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub async fn insert(&self, key: FetchFingerprint, events: Vec<SwapEvent>) -> Arc<[SwapEvent]> {
        let events: Arc<[SwapEvent]> = events.into();
        let entry = CacheEntry {
            events: events.clone(),
            inserted_at: Instant::now(),
        };
        self.entries.write().await.put(key, entry);
        events
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
