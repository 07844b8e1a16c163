/// Tunables otherwise left as bare constants, collected here so
/// tests (and, eventually, alternate deployments) can override them without
/// touching the drive loop.
#[derive(Debug, Clone, Copy)]
pub struct StateSyncConfig {
    /// Maximum number of `SyncItem`s per `Batch`. Fixed at 384.
    pub max_batch_size: usize,
    /// Maximum number of batches that may be outstanding at once.
    /// Fixed at 1: only one network round-trip is ever in flight, which
    /// caps memory and makes progress journaling trivial.
    pub max_pending: u64,
    /// Capacity of the Dedup Cache.
    pub dedup_cache_capacity: usize,
}

impl Default for StateSyncConfig {
    fn default() -> Self {
        StateSyncConfig {
            max_batch_size: 384,
            max_pending: 1,
            dedup_cache_capacity: crate::dedup::DEFAULT_CAPACITY,
        }
    }
}
