//! End-to-end exercises of `SyncCore` against the in-memory test harness,
//! covering the concrete walk-throughs this core was built against.

use std::sync::Arc;

use ethereum_types::H256;
use ethrex_statesync::testutil::{
    encode_account, memory_core, MemoryAccountCodec, MemoryNode, MemoryStore, MemoryTrieCodec,
    RemotePeer,
};
use ethrex_statesync::{StateSyncConfig, SyncCore, EMPTY_TREE_HASH, HASH_OF_EMPTY_STRING};
use tokio_util::sync::CancellationToken;

fn peer_of(data: Vec<(H256, Vec<u8>)>) -> RemotePeer {
    RemotePeer::new(data.into_iter().collect())
}

#[tokio::test]
async fn empty_root_is_a_no_op() {
    let core = memory_core(StateSyncConfig::default());
    let cancel = CancellationToken::new();

    let consumed = core.sync(&cancel, *EMPTY_TREE_HASH).await.unwrap();

    assert_eq!(consumed, 0);
    assert_eq!(core.progress().saved_nodes, 0);
    assert_eq!(core.progress().requested, 0);
}

#[tokio::test]
async fn single_empty_account_leaf_is_saved() {
    let leaf = MemoryNode::Leaf {
        value: encode_account(*HASH_OF_EMPTY_STRING, *EMPTY_TREE_HASH),
    };
    let root_hash = leaf.hash();

    let core = memory_core(StateSyncConfig::default());
    core.set_executor(Arc::new(peer_of(vec![(root_hash, leaf.encode())])))
        .unwrap();

    let consumed = core.sync(&CancellationToken::new(), root_hash).await.unwrap();

    assert_eq!(consumed, 1);
    let progress = core.progress();
    assert_eq!(progress.saved_accounts, 1);
    assert_eq!(progress.saved_state, 1);
    assert!(core.is_fully_synced(root_hash).await.unwrap());
}

#[tokio::test]
async fn branch_with_shared_child_hash_saves_each_node_once() {
    let leaf = MemoryNode::Leaf {
        value: encode_account(*HASH_OF_EMPTY_STRING, *EMPTY_TREE_HASH),
    };
    let leaf_hash = leaf.hash();

    let mut children = [None; 16];
    children[3] = Some(leaf_hash);
    children[7] = Some(leaf_hash);
    let branch = MemoryNode::Branch {
        children,
        value: None,
    };
    let root_hash = branch.hash();

    let core = memory_core(StateSyncConfig::default());
    core.set_executor(Arc::new(peer_of(vec![
        (root_hash, branch.encode()),
        (leaf_hash, leaf.encode()),
    ])))
    .unwrap();

    let consumed = core.sync(&CancellationToken::new(), root_hash).await.unwrap();

    // The branch references the same child twice; it must only be
    // requested and saved once.
    assert_eq!(consumed, 2);
    let progress = core.progress();
    assert_eq!(progress.saved_nodes, 2);
    assert_eq!(progress.saved_accounts, 1);
    assert_eq!(progress.requested, 2);
    assert!(core.is_fully_synced(root_hash).await.unwrap());
    assert!(core.is_fully_synced(leaf_hash).await.unwrap());
}

// The missing-item-replay scenario (drives `prepare_requests`/
// `handle_response` directly to pin down counters after a dropped item is
// replayed) lives in `handler.rs`'s own `#[cfg(test)]` module instead of
// here: those two methods are `pub(crate)`, and this file compiles as a
// separate crate that can only reach the library's public surface.

#[tokio::test]
async fn code_hash_equal_to_storage_root_is_saved_into_both_stores() {
    let code_node = MemoryNode::Leaf {
        value: b"contract bytecode".to_vec(),
    };
    let code_hash = code_node.hash();

    let leaf = MemoryNode::Leaf {
        value: encode_account(code_hash, code_hash),
    };
    let root_hash = leaf.hash();

    let state_store = MemoryStore::new();
    let code_store = MemoryStore::new();
    let core = SyncCore::new(
        state_store.clone(),
        code_store.clone(),
        Arc::new(MemoryTrieCodec),
        Arc::new(MemoryAccountCodec),
        StateSyncConfig::default(),
    );
    core.set_executor(Arc::new(peer_of(vec![
        (root_hash, leaf.encode()),
        (code_hash, code_node.encode()),
    ])))
    .unwrap();

    let consumed = core.sync(&CancellationToken::new(), root_hash).await.unwrap();

    assert_eq!(consumed, 2);
    let progress = core.progress();
    assert_eq!(progress.saved_accounts, 1);
    assert_eq!(progress.saved_state, 1);
    assert_eq!(progress.saved_storage, 1);
    assert_eq!(progress.saved_code, 1);
    // Only one download served the collided hash, but it lands in both
    // stores.
    assert_eq!(state_store.committed_len(), 2);
    assert_eq!(code_store.committed_len(), 1);
}

#[tokio::test]
async fn corrupted_response_is_rejected_and_succeeds_on_retry() {
    let leaf = MemoryNode::Leaf {
        value: encode_account(*HASH_OF_EMPTY_STRING, *EMPTY_TREE_HASH),
    };
    let root_hash = leaf.hash();

    let core = memory_core(StateSyncConfig::default());
    let peer = peer_of(vec![(root_hash, leaf.encode())]);
    peer.corrupt_once(root_hash);
    core.set_executor(Arc::new(peer)).unwrap();

    let consumed = core.sync(&CancellationToken::new(), root_hash).await.unwrap();

    assert_eq!(consumed, 1);
    // The first (corrupted) attempt and the successful retry both count
    // against the requested counter.
    assert_eq!(core.progress().requested, 2);
    assert!(core.is_fully_synced(root_hash).await.unwrap());
}

#[tokio::test]
async fn syncing_a_new_root_resets_state_and_accumulates_progress() {
    let leaf_a = MemoryNode::Leaf {
        value: encode_account(*HASH_OF_EMPTY_STRING, *EMPTY_TREE_HASH),
    };
    let root_a = leaf_a.hash();
    // A second root with the same shape would collide on hash; give it a
    // distinct (non-empty) storage root so the two roots differ.
    let storage_leaf = MemoryNode::Leaf { value: vec![0x42] };
    let storage_hash = storage_leaf.hash();
    let leaf_b = MemoryNode::Leaf {
        value: encode_account(*HASH_OF_EMPTY_STRING, storage_hash),
    };
    let root_b = leaf_b.hash();
    assert_ne!(root_a, root_b);

    let core = memory_core(StateSyncConfig::default());
    let cancel = CancellationToken::new();

    core.set_executor(Arc::new(peer_of(vec![(root_a, leaf_a.encode())])))
        .unwrap();
    core.sync(&cancel, root_a).await.unwrap();
    assert_eq!(core.progress().saved_nodes, 1);

    core.set_executor(Arc::new(peer_of(vec![
        (root_b, leaf_b.encode()),
        (storage_hash, storage_leaf.encode()),
    ])))
    .unwrap();
    let consumed = core.sync(&cancel, root_b).await.unwrap();

    // Progress is cumulative across roots; the queue/dependency reset on
    // root change doesn't touch the persisted counters.
    assert_eq!(consumed, 3);
    let progress = core.progress();
    assert_eq!(progress.saved_nodes, 3);
    assert_eq!(progress.saved_accounts, 2);
    assert!(core.is_fully_synced(root_a).await.unwrap());
    assert!(core.is_fully_synced(root_b).await.unwrap());
}
