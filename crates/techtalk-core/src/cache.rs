use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

#[derive(Debug, Clone)]
struct CachedResponse {
    content: String,
    stored_at: Instant,
}

/// Completed replies keyed by the user text that produced them
pub struct ResponseCache {
    entries: LruCache<String, CachedResponse>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    /// A fresh entry for `key`. Expired entries are dropped on lookup.
    pub fn get(&mut self, key: &str) -> Option<String> {
        let expired = self.entries.get(key)?.stored_at.elapsed() >= self.ttl;
        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|hit| hit.content.clone())
    }

    pub fn insert(&mut self, key: String, content: String) {
        self.entries.put(
            key,
            CachedResponse {
                content,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
