// cache.rs
// Bounded, thread-safe, read-through LRU cache sitting between the memtables
// and the SSTable list on the read path. Mirrors the query-cache's
// `RwLock<LruCache<..>>` + hit/miss-counter shape, generalized from
// query-result caching to raw key/value bytes.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
    pub capacity: usize,
}

pub struct ReadThroughCache {
    inner: Mutex<LruCache<Vec<u8>, Vec<u8>>>,
    hits: std::sync::atomic::AtomicU64,
    misses: std::sync::atomic::AtomicU64,
    capacity: usize,
}

impl ReadThroughCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ReadThroughCache {
            inner: Mutex::new(LruCache::new(NonZeroUsize::new(capacity).unwrap())),
            hits: std::sync::atomic::AtomicU64::new(0),
            misses: std::sync::atomic::AtomicU64::new(0),
            capacity,
        }
    }

    /// Look up `key`, promoting it to most-recently-used on hit.
    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        use std::sync::atomic::Ordering;
        let mut inner = self.inner.lock();
        match inner.get(key) {
            Some(v) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(v.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, evicting the least-recently-used entry if
    /// the cache is at capacity.
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>) {
        self.inner.lock().put(key, value);
    }

    /// Invalidate a single key, e.g. on delete.
    pub fn invalidate(&self, key: &[u8]) {
        self.inner.lock().pop(key);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        use std::sync::atomic::Ordering;
        let inner = self.inner.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: inner.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_hits() {
        let cache = ReadThroughCache::new(2);
        cache.put(b"a".to_vec(), b"1".to_vec());
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn miss_on_absent_key() {
        let cache = ReadThroughCache::new(2);
        assert_eq!(cache.get(b"missing"), None);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn evicts_least_recently_used_on_overflow() {
        let cache = ReadThroughCache::new(2);
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.put(b"b".to_vec(), b"2".to_vec());
        // touch "a" so "b" becomes the LRU entry
        cache.get(b"a");
        cache.put(b"c".to_vec(), b"3".to_vec());

        assert_eq!(cache.get(b"b"), None);
        assert_eq!(cache.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(cache.get(b"c"), Some(b"3".to_vec()));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = ReadThroughCache::new(2);
        cache.put(b"a".to_vec(), b"1".to_vec());
        cache.invalidate(b"a");
        assert_eq!(cache.get(b"a"), None);
    }
}
