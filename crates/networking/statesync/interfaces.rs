//! External collaborators this core delegates to. Peer selection, wire
//! encoding, trie-node decoding, account decoding and persistent storage are
//! all out of scope for the core itself — this module is
//! the seam.

use std::sync::LazyLock;

use async_trait::async_trait;
use ethereum_types::H256;
use tiny_keccak::{Hasher as _, Keccak};

use crate::error::{AccountCodecError, StoreError, TrieCodecError};
use crate::item::SyncItem;

fn keccak256(bytes: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut out);
    H256::from(out)
}

/// Digest of the RLP-encoded empty trie (`keccak(0x80)`). Used as the
/// sentinel meaning "no sub-trie" for an account's storage root.
pub static EMPTY_TREE_HASH: LazyLock<H256> = LazyLock::new(|| keccak256(&[0x80]));

/// Digest of the empty byte string (`keccak("")`). Used as the sentinel
/// meaning "this account has no contract code".
pub static HASH_OF_EMPTY_STRING: LazyLock<H256> = LazyLock::new(|| keccak256(&[]));

/// A single request/response round-trip: `items[i]` pairs positionally with
/// `responses[i]`. `responses` may be shorter than `items`, or contain
/// missing slots, if the peer only answered part of the batch.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub items: Vec<SyncItem>,
    pub responses: Option<Vec<Option<Vec<u8>>>>,
}

impl Batch {
    pub fn new(items: Vec<SyncItem>) -> Self {
        Batch {
            items,
            responses: None,
        }
    }

    pub fn response_at(&self, index: usize) -> Option<&[u8]> {
        self.responses
            .as_ref()
            .and_then(|r| r.get(index))
            .and_then(|slot| slot.as_deref())
    }
}

/// Drives the request/response round trip against a remote peer. Peer
/// selection, scoring and wire framing all live on the other side of this
/// trait.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
    async fn execute_request(
        &self,
        cancel: &tokio_util::sync::CancellationToken,
        batch: Batch,
    ) -> Batch;
}

/// One of the two persistent key-value stores (trie nodes or contract
/// code), keyed by the node's cryptographic hash.
///
/// Implementors own their own exclusive lock. Callers needing both stores
/// must acquire the state store before the code store (state-store lock
/// outer, code-store lock inner) to preclude deadlock.
#[async_trait]
pub trait SnapshotableStore: Send + Sync {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;
    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;
    async fn key_exists(&self, key: &[u8]) -> Result<bool, StoreError>;
    async fn commit(&self) -> Result<(), StoreError>;
    /// Writes under a raw (non hash-derived) key. Used only for the
    /// Progress Record.
    async fn put_indexed(&self, raw_key: &[u8], value: Vec<u8>) -> Result<(), StoreError>;
}

/// The decoded shape of a trie node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrieNodeKind {
    Branch,
    Extension,
    Leaf,
    /// Decoding succeeded but the result matches none of the three known
    /// shapes; fatal, indicates codec or peer corruption.
    Unknown,
}

/// A trie node decoded from raw bytes by a [`TrieCodec`].
pub trait TrieNode: Send + Sync {
    fn kind(&self) -> TrieNodeKind;

    /// For a [`TrieNodeKind::Branch`]: the 16 child slots, precomputed so
    /// repeated access doesn't re-derive each slot's hash.
    fn build_lookup_table(&self) -> Option<[Option<H256>; 16]>;

    /// For a [`TrieNodeKind::Extension`]: the single child hash.
    fn extension_child(&self) -> Option<H256>;

    /// For a [`TrieNodeKind::Leaf`]: the raw value bytes.
    fn leaf_value(&self) -> Option<&[u8]>;
}

/// Decodes raw node bytes into branch/extension/leaf form.
pub trait TrieCodec: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn TrieNode>, TrieCodecError>;
}

/// The fields of an account leaf this core cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Account {
    pub code_hash: H256,
    pub storage_root: H256,
}

/// Decodes an account-leaf payload into `(code_hash, storage_root)`.
pub trait AccountCodec: Send + Sync {
    fn decode(&self, leaf_value: &[u8]) -> Result<Account, AccountCodecError>;
}
