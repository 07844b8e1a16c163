use std::collections::{HashMap, HashSet};

use ethereum_types::H256;
use parking_lot::Mutex;

use crate::item::ParentHandle;

/// Maps an unsaved child hash to the set of parents blocked on it.
///
/// Invariant: every parent that appears in some value set has `counter > 0`;
/// a parent is removed from all sets exactly once, when its own save runs.
/// Mutated only from the Response Handler / Save Path side of the drive
/// loop — no external mutation is permitted.
///
/// The Merkle trie is a DAG rooted at the sync root because hashes are
/// content addresses, so this map never needs cycle detection: a plain
/// `HashMap` is sufficient.
#[derive(Default)]
pub struct DependencyTracker {
    inner: Mutex<HashMap<H256, HashSet<ParentHandle>>>,
}

impl DependencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `parent` is waiting on `child_hash`. Returns `true` if
    /// `child_hash` already had at least one waiting parent before this
    /// call (i.e. a request for it is already in flight or queued).
    pub fn add_dependency(&self, child_hash: H256, parent: ParentHandle) -> bool {
        let mut map = self.inner.lock();
        let already_present = map.contains_key(&child_hash);
        map.entry(child_hash).or_default().insert(parent);
        already_present
    }

    /// Removes and returns the parent set waiting on `hash`, if any.
    pub fn take_waiters(&self, hash: &H256) -> Option<HashSet<ParentHandle>> {
        self.inner.lock().remove(hash)
    }

    pub fn contains_key(&self, hash: &H256) -> bool {
        self.inner.lock().contains_key(hash)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{DependentParent, NodeKind, SyncItem};

    fn parent_handle(hash: H256) -> ParentHandle {
        DependentParent::new(SyncItem::child(hash, NodeKind::State, 0, 0.0), vec![], 1)
    }

    #[test]
    fn add_dependency_reports_prior_presence() {
        let tracker = DependencyTracker::new();
        let child = H256::repeat_byte(9);
        let p1 = parent_handle(H256::repeat_byte(1));
        let p2 = parent_handle(H256::repeat_byte(2));

        assert!(!tracker.add_dependency(child, p1));
        assert!(tracker.add_dependency(child, p2));
        assert_eq!(tracker.take_waiters(&child).unwrap().len(), 2);
        assert!(!tracker.contains_key(&child));
    }
}
