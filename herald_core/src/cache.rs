/*!
 * Thread-safe least-recently-used cache map.
 *
 * Thin mutex wrapper over `lru::LruCache`. Both bus caches (compiled
 * predicates and per-topic mask expansions) store `Arc`ed values, so
 * `get` hands out cheap clones and promotes the entry in one step.
 *
 * Resizing applies from the next insertion on; shrinking evicts the
 * least recently used entries immediately but never invalidates the
 * survivors.
 */

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::util::lock_unpoisoned;

pub struct CacheMap<K: Hash + Eq, V: Clone> {
    inner: Mutex<LruCache<K, V>>,
}

impl<K: Hash + Eq, V: Clone> CacheMap<K, V> {
    /**
     * Creates a cache holding at most `capacity` entries. A zero
     * capacity is clamped to one entry.
     */
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(clamp(capacity))),
        }
    }

    /// Returns a clone of the cached value and marks it most recently
    /// used.
    pub fn get(&self, key: &K) -> Option<V> {
        lock_unpoisoned(&self.inner).get(key).cloned()
    }

    /// Inserts a value, evicting the least recently used entry when
    /// the cache is at capacity.
    pub fn insert(&self, key: K, value: V) {
        lock_unpoisoned(&self.inner).put(key, value);
    }

    /// Applies a new capacity. Existing entries stay valid; excess
    /// least-recently-used entries are evicted.
    pub fn resize(&self, capacity: usize) {
        lock_unpoisoned(&self.inner).resize(clamp(capacity));
    }

    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.inner).len()
    }
}

fn clamp(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}
