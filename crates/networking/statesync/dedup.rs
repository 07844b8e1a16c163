use std::num::NonZeroUsize;

use ethereum_types::H256;
use lru::LruCache;
use parking_lot::Mutex;

/// Default capacity for the Dedup Cache.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// Bounded LRU of recently-saved hashes, used to skip a store probe for
/// hashes we know were just written. Set-semantics only; the cached value
/// carries no information.
pub struct DedupCache {
    inner: Mutex<LruCache<H256, ()>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        DedupCache {
            inner: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn contains(&self, hash: &H256) -> bool {
        self.inner.lock().contains(hash)
    }

    pub fn insert(&self, hash: H256) {
        self.inner.lock().put(hash, ());
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_contains() {
        let cache = DedupCache::with_capacity(2);
        let h = H256::repeat_byte(1);
        assert!(!cache.contains(&h));
        cache.insert(h);
        assert!(cache.contains(&h));
    }

    #[test]
    fn evicts_oldest_over_capacity() {
        let cache = DedupCache::with_capacity(2);
        let a = H256::repeat_byte(1);
        let b = H256::repeat_byte(2);
        let c = H256::repeat_byte(3);
        cache.insert(a);
        cache.insert(b);
        cache.insert(c);
        assert!(!cache.contains(&a));
        assert!(cache.contains(&b));
        assert!(cache.contains(&c));
    }
}
