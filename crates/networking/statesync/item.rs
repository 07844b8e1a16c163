use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ethereum_types::H256;

/// Which store a hash belongs to and how its children (if any) are expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A node of the top-level state trie.
    State,
    /// A node of an account's storage trie.
    Storage,
    /// A contract bytecode blob. Never has children.
    Code,
}

/// The unit of work the core drives end to end: discovered, queued,
/// requested, validated, expanded and finally saved.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncItem {
    /// 32-byte digest identifying the expected payload.
    pub hash: H256,
    pub node_kind: NodeKind,
    /// Depth below the root of the owning trie. A storage-trie root carried
    /// from a state leaf resets to 0.
    pub level: u32,
    /// Lower dispatches first; see the Request Planner's priority formula.
    pub priority: f32,
    /// Marks the overall sync root; its save is the terminal event.
    pub is_root: bool,
    /// Set once a State-kind item is identified as an account leaf (as
    /// opposed to a branch or extension of the state trie), so `persist`
    /// can credit `saved_accounts` whether the leaf saves immediately or
    /// only later, once a cascade resolves its storage/code children.
    pub is_account_leaf: bool,
}

impl SyncItem {
    pub fn root(hash: H256) -> Self {
        SyncItem {
            hash,
            node_kind: NodeKind::State,
            level: 0,
            priority: 1.0,
            is_root: true,
            is_account_leaf: false,
        }
    }

    pub fn child(hash: H256, node_kind: NodeKind, level: u32, priority: f32) -> Self {
        SyncItem {
            hash,
            node_kind,
            level,
            priority,
            is_root: false,
            is_account_leaf: false,
        }
    }

    pub fn as_account_leaf(mut self) -> Self {
        self.is_account_leaf = true;
        self
    }
}

/// A parent node awaiting its children, shared by reference between every
/// dependency-map entry it appears in so decrementing the counter once per
/// arriving child converges on a single object.
///
/// Two `DependentParent`s are equal iff their `sync_item.hash` bytes match —
/// this is structural equality on the hash, not pointer identity, which lets
/// a freshly reconstructed parent compare equal to one already recorded.
#[derive(Debug)]
pub struct DependentParent {
    pub sync_item: SyncItem,
    pub payload: Vec<u8>,
    counter: AtomicU64,
}

pub type ParentHandle = Arc<DependentParent>;

impl DependentParent {
    pub fn new(sync_item: SyncItem, payload: Vec<u8>, counter: u64) -> ParentHandle {
        Arc::new(DependentParent {
            sync_item,
            payload,
            counter: AtomicU64::new(counter),
        })
    }

    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    pub fn increment(&self) {
        self.counter.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the counter and returns the value *after* the decrement.
    pub fn decrement(&self) -> u64 {
        self.counter.fetch_sub(1, Ordering::AcqRel) - 1
    }
}

impl PartialEq for DependentParent {
    fn eq(&self, other: &Self) -> bool {
        self.sync_item.hash == other.sync_item.hash
    }
}

impl Eq for DependentParent {}

impl Hash for DependentParent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sync_item.hash.hash(state);
    }
}

/// Outcome of passing a newly-discovered hash through the admission gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddNodeResult {
    /// Pushed to the Pending Queue; nothing else referenced it yet.
    Added,
    /// Already a key in the dependency map (in-flight or queued); the new
    /// parent dependency was recorded so it resolves when the prior request
    /// eventually arrives.
    AlreadyRequested,
    /// Found in the Dedup Cache or in the owning store.
    AlreadySaved,
}
