//! In-memory collaborators used to exercise the core end to end without a
//! real network or database, in the spirit of `ethrex-p2p`'s `test-utils`
//! feature and its peer-simulation test harnesses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ethereum_types::H256;
use parking_lot::Mutex;
use tiny_keccak::{Hasher as _, Keccak};
use tokio_util::sync::CancellationToken;

use crate::config::StateSyncConfig;
use crate::error::{AccountCodecError, StoreError, TrieCodecError};
use crate::interfaces::{
    Account, AccountCodec, Batch, RequestExecutor, SnapshotableStore, TrieCodec, TrieNode,
    TrieNodeKind,
};
use crate::orchestrator::SyncCore;

pub fn keccak256(bytes: &[u8]) -> H256 {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(bytes);
    hasher.finalize(&mut out);
    H256::from(out)
}

/// A key-value store backed by a `HashMap`, standing in for a
/// [`SnapshotableStore`]. `committed` tracks what `commit()` has flushed, so
/// tests can assert nothing landed before a commit.
#[derive(Default)]
pub struct MemoryStore {
    staged: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    committed: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn committed_len(&self) -> usize {
        self.committed.lock().len()
    }
}

#[async_trait]
impl SnapshotableStore for MemoryStore {
    async fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.committed.lock().get(key).cloned())
    }

    async fn set(&self, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.staged.lock().insert(key.to_vec(), value);
        Ok(())
    }

    async fn key_exists(&self, key: &[u8]) -> Result<bool, StoreError> {
        Ok(self.committed.lock().contains_key(key))
    }

    async fn commit(&self) -> Result<(), StoreError> {
        let mut staged = self.staged.lock();
        let mut committed = self.committed.lock();
        for (key, value) in staged.drain() {
            committed.insert(key, value);
        }
        Ok(())
    }

    async fn put_indexed(&self, raw_key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        self.staged.lock().insert(raw_key.to_vec(), value);
        Ok(())
    }
}

/// Wire shape used by the in-memory trie codec. Not Ethereum RLP — the real
/// wire format is out of scope for this core (`TrieCodec` is external) — but
/// internally consistent, which is all the test harness needs.
pub enum MemoryNode {
    Branch {
        children: [Option<H256>; 16],
        value: Option<Vec<u8>>,
    },
    Extension {
        child: H256,
    },
    Leaf {
        value: Vec<u8>,
    },
}

impl MemoryNode {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            MemoryNode::Branch { children, value } => {
                out.push(0u8);
                for child in children {
                    match child {
                        Some(hash) => {
                            out.push(1);
                            out.extend_from_slice(hash.as_bytes());
                        }
                        None => {
                            out.push(0);
                            out.extend_from_slice(&[0u8; 32]);
                        }
                    }
                }
                match value {
                    Some(v) => {
                        out.push(1);
                        out.extend_from_slice(&(v.len() as u32).to_be_bytes());
                        out.extend_from_slice(v);
                    }
                    None => out.push(0),
                }
            }
            MemoryNode::Extension { child } => {
                out.push(1u8);
                out.extend_from_slice(child.as_bytes());
            }
            MemoryNode::Leaf { value } => {
                out.push(2u8);
                out.extend_from_slice(value);
            }
        }
        out
    }

    pub fn hash(&self) -> H256 {
        keccak256(&self.encode())
    }
}

struct DecodedNode {
    kind: TrieNodeKind,
    children: [Option<H256>; 16],
    extension_child: Option<H256>,
    value: Option<Vec<u8>>,
}

impl TrieNode for DecodedNode {
    fn kind(&self) -> TrieNodeKind {
        self.kind
    }

    fn build_lookup_table(&self) -> Option<[Option<H256>; 16]> {
        (self.kind == TrieNodeKind::Branch).then_some(self.children)
    }

    fn extension_child(&self) -> Option<H256> {
        self.extension_child
    }

    fn leaf_value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }
}

pub struct MemoryTrieCodec;

impl TrieCodec for MemoryTrieCodec {
    fn decode(&self, bytes: &[u8]) -> Result<Box<dyn TrieNode>, TrieCodecError> {
        let tag = *bytes
            .first()
            .ok_or_else(|| TrieCodecError::Malformed("empty".into()))?;
        match tag {
            0 => {
                let mut children = [None; 16];
                let mut cursor = 1usize;
                for slot in &mut children {
                    let present = *bytes
                        .get(cursor)
                        .ok_or_else(|| TrieCodecError::Malformed("truncated branch".into()))?;
                    cursor += 1;
                    let hash_bytes = bytes
                        .get(cursor..cursor + 32)
                        .ok_or_else(|| TrieCodecError::Malformed("truncated branch hash".into()))?;
                    cursor += 32;
                    if present == 1 {
                        *slot = Some(H256::from_slice(hash_bytes));
                    }
                }
                let has_value = *bytes
                    .get(cursor)
                    .ok_or_else(|| TrieCodecError::Malformed("truncated branch value flag".into()))?;
                cursor += 1;
                let value = if has_value == 1 {
                    let len_bytes = bytes
                        .get(cursor..cursor + 4)
                        .ok_or_else(|| TrieCodecError::Malformed("truncated branch value len".into()))?;
                    let len = u32::from_be_bytes(len_bytes.try_into().expect("4 bytes")) as usize;
                    cursor += 4;
                    Some(
                        bytes
                            .get(cursor..cursor + len)
                            .ok_or_else(|| TrieCodecError::Malformed("truncated branch value".into()))?
                            .to_vec(),
                    )
                } else {
                    None
                };
                Ok(Box::new(DecodedNode {
                    kind: TrieNodeKind::Branch,
                    children,
                    extension_child: None,
                    value,
                }))
            }
            1 => {
                let hash_bytes = bytes
                    .get(1..33)
                    .ok_or_else(|| TrieCodecError::Malformed("truncated extension".into()))?;
                Ok(Box::new(DecodedNode {
                    kind: TrieNodeKind::Extension,
                    children: [None; 16],
                    extension_child: Some(H256::from_slice(hash_bytes)),
                    value: None,
                }))
            }
            2 => Ok(Box::new(DecodedNode {
                kind: TrieNodeKind::Leaf,
                children: [None; 16],
                extension_child: None,
                value: Some(bytes[1..].to_vec()),
            })),
            _ => Ok(Box::new(DecodedNode {
                kind: TrieNodeKind::Unknown,
                children: [None; 16],
                extension_child: None,
                value: None,
            })),
        }
    }
}

pub struct MemoryAccountCodec;

impl AccountCodec for MemoryAccountCodec {
    fn decode(&self, leaf_value: &[u8]) -> Result<Account, AccountCodecError> {
        if leaf_value.len() != 64 {
            return Err(AccountCodecError::Malformed(format!(
                "expected 64-byte account leaf, got {}",
                leaf_value.len()
            )));
        }
        Ok(Account {
            code_hash: H256::from_slice(&leaf_value[0..32]),
            storage_root: H256::from_slice(&leaf_value[32..64]),
        })
    }
}

pub fn encode_account(code_hash: H256, storage_root: H256) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(code_hash.as_bytes());
    out.extend_from_slice(storage_root.as_bytes());
    out
}

/// A remote peer simulator: a fixed map of hash -> payload it will answer
/// requests from, optionally dropping or corrupting specific hashes to
/// exercise the missing/invalid-data paths.
pub struct RemotePeer {
    data: HashMap<H256, Vec<u8>>,
    drop: Mutex<std::collections::HashSet<H256>>,
    corrupt: Mutex<std::collections::HashSet<H256>>,
}

impl RemotePeer {
    pub fn new(data: HashMap<H256, Vec<u8>>) -> Self {
        RemotePeer {
            data,
            drop: Mutex::new(Default::default()),
            corrupt: Mutex::new(Default::default()),
        }
    }

    pub fn drop_once(&self, hash: H256) {
        self.drop.lock().insert(hash);
    }

    pub fn corrupt_once(&self, hash: H256) {
        self.corrupt.lock().insert(hash);
    }
}

#[async_trait]
impl RequestExecutor for RemotePeer {
    async fn execute_request(&self, _cancel: &CancellationToken, mut batch: Batch) -> Batch {
        let mut responses = Vec::with_capacity(batch.items.len());
        for item in &batch.items {
            if self.drop.lock().remove(&item.hash) {
                responses.push(None);
                continue;
            }
            match self.data.get(&item.hash) {
                Some(payload) => {
                    if self.corrupt.lock().remove(&item.hash) {
                        let mut corrupted = payload.clone();
                        corrupted.push(0xff);
                        responses.push(Some(corrupted));
                    } else {
                        responses.push(Some(payload.clone()));
                    }
                }
                None => responses.push(None),
            }
        }
        batch.responses = Some(responses);
        batch
    }
}

/// Builds a `SyncCore` wired to fresh in-memory collaborators, for tests
/// that only need queue/planner/dedup behavior and never dispatch a
/// request.
pub fn memory_core(config: StateSyncConfig) -> SyncCore {
    SyncCore::new(
        MemoryStore::new(),
        MemoryStore::new(),
        Arc::new(MemoryTrieCodec),
        Arc::new(MemoryAccountCodec),
        config,
    )
}
