use ethereum_types::H256;

use crate::error::StateSyncError;
use crate::item::{NodeKind, SyncItem};
use crate::orchestrator::SyncCore;

impl SyncCore {
    /// Writes `item` to the correct store, then triggers the chain
    /// reaction that may cascade the save up through any parents now
    /// unblocked.
    pub(crate) async fn save(&self, item: SyncItem, payload: Vec<u8>) -> Result<(), StateSyncError> {
        self.persist(&item, &payload).await?;
        self.cascade(item.hash).await
    }

    async fn persist(&self, item: &SyncItem, payload: &[u8]) -> Result<(), StateSyncError> {
        match item.node_kind {
            NodeKind::State => {
                self.state_store.set(item.hash.as_bytes(), payload.to_vec()).await?;
                let mut progress = self.progress.lock();
                progress.saved_state += 1;
                if item.is_account_leaf {
                    progress.saved_accounts += 1;
                }
            }
            NodeKind::Storage => {
                self.state_store.set(item.hash.as_bytes(), payload.to_vec()).await?;
                {
                    let mut progress = self.progress.lock();
                    progress.saved_storage += 1;
                }
                if self.codes_same_as_nodes.lock().remove(&item.hash) {
                    self.code_store.set(item.hash.as_bytes(), payload.to_vec()).await?;
                    self.progress.lock().saved_code += 1;
                }
            }
            NodeKind::Code => {
                self.code_store.set(item.hash.as_bytes(), payload.to_vec()).await?;
                self.progress.lock().saved_code += 1;
            }
        }

        self.dedup.insert(item.hash);
        {
            let mut progress = self.progress.lock();
            progress.saved_nodes += 1;
            progress.consumed += 1;
            #[cfg(feature = "metrics")]
            self.metrics.set_consumed(progress.consumed);
        }
        #[cfg(feature = "metrics")]
        self.metrics.record_saved_node();

        if item.is_root && (!self.dependencies.is_empty() || !self.queue.is_empty()) {
            return Err(StateSyncError::InvariantBroken(
                "dependency map or pending queue non-empty at root save",
            ));
        }

        Ok(())
    }

    /// Depth-first, synchronous propagation of a save up through every
    /// parent it unblocks. Implemented with an explicit stack rather than
    /// recursion so an unusually long extension chain can't blow the call
    /// stack.
    async fn cascade(&self, just_saved_hash: H256) -> Result<(), StateSyncError> {
        let mut frontier = vec![just_saved_hash];
        while let Some(hash) = frontier.pop() {
            let Some(waiters) = self.dependencies.take_waiters(&hash) else {
                continue;
            };
            for parent in waiters {
                if parent.decrement() == 0 {
                    self.persist(&parent.sync_item, &parent.payload).await?;
                    frontier.push(parent.sync_item.hash);
                }
            }
        }
        Ok(())
    }
}
