use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use ethereum_types::H256;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StateSyncConfig;
use crate::dedup::DedupCache;
use crate::dependency::DependencyTracker;
use crate::error::StateSyncError;
use crate::interfaces::{AccountCodec, Batch, RequestExecutor, SnapshotableStore, TrieCodec};
use crate::interfaces::EMPTY_TREE_HASH;
use crate::item::SyncItem;
use crate::metrics::SyncMetrics;
use crate::progress::{ProgressJournal, ProgressRecord};
use crate::queue::PendingQueue;

/// The Sync Orchestrator and the shared state every other component
/// (Request Planner, Response Handler, Save Path) operates on.
///
/// This is the public entry point of the core. It owns nothing about peer
/// transport or wire encoding — those live behind
/// [`RequestExecutor`] — and nothing about how nodes are decoded or stored
/// beyond the [`SnapshotableStore`], [`TrieCodec`] and [`AccountCodec`]
/// seams.
pub struct SyncCore {
    pub(crate) state_store: Arc<dyn SnapshotableStore>,
    pub(crate) code_store: Arc<dyn SnapshotableStore>,
    pub(crate) trie_codec: Arc<dyn TrieCodec>,
    pub(crate) account_codec: Arc<dyn AccountCodec>,
    executor: Mutex<Option<Arc<dyn RequestExecutor>>>,
    pub(crate) config: StateSyncConfig,

    pub(crate) queue: PendingQueue,
    pub(crate) dedup: DedupCache,
    pub(crate) dependencies: DependencyTracker,
    pub(crate) codes_same_as_nodes: Mutex<HashSet<H256>>,
    pub(crate) pending_requests: AtomicU64,
    pub(crate) last_request: Mutex<Option<Batch>>,
    pub(crate) max_state_level: AtomicU32,
    pub(crate) progress: Mutex<ProgressRecord>,
    progress_loaded: AtomicBool,
    previous_root: Mutex<Option<H256>>,
    sync_in_progress: AtomicBool,
    pub metrics: SyncMetrics,
}

impl SyncCore {
    pub fn new(
        state_store: Arc<dyn SnapshotableStore>,
        code_store: Arc<dyn SnapshotableStore>,
        trie_codec: Arc<dyn TrieCodec>,
        account_codec: Arc<dyn AccountCodec>,
        config: StateSyncConfig,
    ) -> Self {
        SyncCore {
            state_store,
            code_store,
            trie_codec,
            account_codec,
            executor: Mutex::new(None),
            config,
            queue: PendingQueue::new(),
            dedup: DedupCache::with_capacity(config.dedup_cache_capacity),
            dependencies: DependencyTracker::new(),
            codes_same_as_nodes: Mutex::new(HashSet::new()),
            pending_requests: AtomicU64::new(0),
            last_request: Mutex::new(None),
            max_state_level: AtomicU32::new(0),
            progress: Mutex::new(ProgressRecord::default()),
            progress_loaded: AtomicBool::new(false),
            previous_root: Mutex::new(None),
            sync_in_progress: AtomicBool::new(false),
            metrics: SyncMetrics::default(),
        }
    }

    /// May be invoked once before the first sync. Replacing the executor
    /// while a sync is in progress is rejected rather than left undefined.
    pub fn set_executor(&self, executor: Arc<dyn RequestExecutor>) -> Result<(), StateSyncError> {
        if self.sync_in_progress.load(Ordering::Acquire) {
            return Err(StateSyncError::ExecutorAlreadyRunning);
        }
        *self.executor.lock() = Some(executor);
        Ok(())
    }

    fn executor(&self) -> Result<Arc<dyn RequestExecutor>, StateSyncError> {
        self.executor
            .lock()
            .clone()
            .ok_or(StateSyncError::NoExecutorConfigured)
    }

    pub async fn is_fully_synced(&self, hash: H256) -> Result<bool, StateSyncError> {
        Ok(self.state_store.key_exists(hash.as_bytes()).await?)
    }

    /// Read-only snapshot of the persisted counters, for observability.
    pub fn progress(&self) -> ProgressRecord {
        *self.progress.lock()
    }

    async fn ensure_progress_loaded(&self) -> Result<(), StateSyncError> {
        if !self.progress_loaded.swap(true, Ordering::AcqRel) {
            let loaded = ProgressJournal::load(self.code_store.as_ref()).await?;
            *self.progress.lock() = loaded;
        }
        Ok(())
    }

    /// Seeds the root (if needed) and drives the request/response pipeline
    /// to quiescence. Returns the persisted consumed-nodes counter.
    pub async fn sync(
        &self,
        cancel: &CancellationToken,
        root_hash: H256,
    ) -> Result<u64, StateSyncError> {
        self.ensure_progress_loaded().await?;

        if root_hash == *EMPTY_TREE_HASH {
            return Ok(self.progress.lock().consumed);
        }

        self.sync_in_progress.store(true, Ordering::Release);
        let result = self.sync_inner(cancel, root_hash).await;
        self.sync_in_progress.store(false, Ordering::Release);
        result
    }

    async fn sync_inner(
        &self,
        cancel: &CancellationToken,
        root_hash: H256,
    ) -> Result<u64, StateSyncError> {
        let mut previous_root = self.previous_root.lock();
        let root_changed = *previous_root != Some(root_hash);
        // An implementer should treat ANY positive pending count as evidence
        // of an unfinished prior session, not only the source's narrower
        // "exactly one pending request" check (see DESIGN.md).
        let unfinished_prior_session = self.pending_requests.load(Ordering::Acquire) > 0;
        if root_changed || unfinished_prior_session {
            debug!(root_changed, unfinished_prior_session, "resetting sync state");
            self.dependencies.clear();
            self.queue.drain_all();
            *self.last_request.lock() = None;
            self.codes_same_as_nodes.lock().clear();
            self.pending_requests.store(0, Ordering::Release);
            self.max_state_level.store(0, Ordering::Release);
        }
        *previous_root = Some(root_hash);
        drop(previous_root);

        if self.queue.is_empty() {
            self.queue.push(SyncItem::root(root_hash));
        }

        loop {
            if cancel.is_cancelled() {
                return Err(StateSyncError::Canceled);
            }

            let batches = self.prepare_requests().await;
            if batches.is_empty() {
                break;
            }

            for batch in batches {
                if cancel.is_cancelled() {
                    return Err(StateSyncError::Canceled);
                }
                let responded = self.executor()?.execute_request(cancel, batch).await;
                match self.handle_response(responded).await {
                    Ok(()) => {}
                    Err(err) if err.is_recoverable() => {
                        warn!(error = %err, "batch failed, will retry against the next executor");
                    }
                    Err(err) => return Err(err),
                }
            }
        }

        Ok(self.progress.lock().consumed)
    }
}
