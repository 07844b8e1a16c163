use std::sync::atomic::Ordering;

use tracing::trace;

use crate::interfaces::Batch;
use crate::item::{NodeKind, SyncItem};
use crate::orchestrator::SyncCore;

impl SyncCore {
    /// Drains the Pending Queue into bounded batches, enforcing the
    /// in-flight cap and replaying the last unacknowledged batch first.
    ///
    /// See the module docs for the numbered rules this follows.
    pub(crate) async fn prepare_requests(&self) -> Vec<Batch> {
        if let Some(unacknowledged) = self.last_request.lock().take() {
            for item in unacknowledged.items {
                self.queue.push(item);
            }
        }

        let mut batches = Vec::new();
        let mut produced = 0u64;
        while !self.queue.is_empty()
            && self.pending_requests.load(Ordering::Acquire) + produced < self.config.max_pending
        {
            let mut items = Vec::with_capacity(self.config.max_batch_size);
            while items.len() < self.config.max_batch_size {
                match self.queue.pop() {
                    Some(item) => items.push(item),
                    None => break,
                }
            }
            if items.is_empty() {
                break;
            }
            batches.push(Batch::new(items));
            produced += 1;
        }

        self.pending_requests
            .fetch_add(batches.len() as u64, Ordering::AcqRel);

        if !batches.is_empty() {
            let requested: u64 = batches.iter().map(|b| b.items.len() as u64).sum();
            self.progress.lock().requested += requested;
            #[cfg(feature = "metrics")]
            self.metrics.record_requested(requested);
            trace!(batches = batches.len(), requested, "prepared batches");
        }

        // Record the batch about to be handed to the executor before it is
        // dispatched, so a crash (or a restart before its response is
        // processed) finds it still in `last_request` and replays it in
        // full on the next `prepare_requests` call. `end_round_trip` clears
        // this slot once the response has actually been handled. With
        // `max_pending == 1` there is at most one outstanding batch to
        // track; if a future configuration raises the cap, the slot holds
        // the most recently dispatched batch.
        if let Some(batch) = batches.last() {
            *self.last_request.lock() = Some(batch.clone());
        }

        batches
    }

    /// Priority for a newly-discovered child of `parent`. A child of a
    /// non-State parent always gets priority 0. Otherwise the formula below
    /// is preserved verbatim from the system this was modeled on: it mixes
    /// ratios and raw depth in a way that looks odd in isolation but is
    /// known to bias dispatch toward deeper items while still cycling
    /// shallow work so the queue doesn't starve. Treat it as a contract,
    /// not a guess.
    pub(crate) fn priority_for_child(&self, parent: &SyncItem) -> f32 {
        if parent.node_kind != NodeKind::State {
            return 0.0;
        }
        let level = parent.level;
        self.max_state_level.fetch_max(level, Ordering::AcqRel);
        // max_state_level tracks a monotonic high-water mark; level 0 at the
        // root divides against itself, so floor the divisor at 1 rather than
        // special-casing the root.
        let max_level = self.max_state_level.load(Ordering::Acquire).max(1) as f32;
        let ratio = level as f32 / max_level;
        let by_depth = 1.0 - ratio;
        let by_parent_priority = parent.priority - ratio;
        by_depth.max(by_parent_priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateSyncConfig;
    use crate::testutil::memory_core;
    use ethereum_types::H256;

    #[tokio::test]
    async fn batches_respect_max_pending() {
        let core = memory_core(StateSyncConfig {
            max_pending: 1,
            max_batch_size: 1,
            ..Default::default()
        });
        core.queue.push(SyncItem::child(H256::repeat_byte(1), NodeKind::State, 1, 0.0));
        core.queue.push(SyncItem::child(H256::repeat_byte(2), NodeKind::State, 1, 0.0));
        let batches = core.prepare_requests().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].items.len(), 1);
        assert_eq!(core.pending_requests.load(Ordering::Acquire), 1);
        // A second call can't produce another batch while one is pending,
        // even though the queue still has an item.
        let second = core.prepare_requests().await;
        assert!(second.is_empty());
    }

    #[test]
    fn root_children_get_priority_one() {
        let core = memory_core(StateSyncConfig::default());
        let root = SyncItem::root(H256::zero());
        assert_eq!(core.priority_for_child(&root), 1.0);
    }

    #[test]
    fn non_state_parent_yields_zero_priority() {
        let core = memory_core(StateSyncConfig::default());
        let parent = SyncItem::child(H256::zero(), NodeKind::Storage, 3, 0.2);
        assert_eq!(core.priority_for_child(&parent), 0.0);
    }
}
