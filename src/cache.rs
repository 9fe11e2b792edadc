use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone)]
struct CacheEntry<V> {
    stored_at: Instant,
    value: V,
}

/// Keyed response cache with a fixed TTL. Lives as long as its owner; there
/// is no process-wide instance.
#[derive(Clone)]
pub struct RequestCache<V> {
    store: Arc<DashMap<String, CacheEntry<V>>>,
    ttl: Duration,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self { store: Arc::new(DashMap::new()), ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any. Expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        if let Some(entry) = self.store.get(key) {
            if now.duration_since(entry.stored_at) < self.ttl {
                metrics::increment_counter!("quill_cache_hits");
                return Some(entry.value.clone());
            }
        }
        // remove after the read guard is released
        self.store.remove_if(key, |_, e| now.duration_since(e.stored_at) >= self.ttl);
        metrics::increment_counter!("quill_cache_misses");
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        if self.ttl.is_zero() { return; }
        self.store.insert(key.into(), CacheEntry { stored_at: Instant::now(), value });
    }

    /// Drop every key containing `pattern`, or everything when `None`.
    pub fn invalidate(&self, pattern: Option<&str>) {
        match pattern {
            None => self.store.clear(),
            Some(p) => self.store.retain(|k, _| !k.contains(p)),
        }
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}
