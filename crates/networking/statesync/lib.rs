//! # ethrex state-sync core
//!
//! The pipelined request/response engine behind fast (snap-style) state
//! synchronization: given the hash of a state-trie root, walk the remote
//! Merkle-Patricia trie node by node, track which branches are still
//! waiting on children, and persist every trie node and contract-code blob
//! into two local key-value stores keyed by hash.
//!
//! ## Architecture
//!
//! This crate is a single-writer event loop (see [`SyncCore::sync`])
//! surrounded by a handful of cooperating data structures:
//!
//! - [`queue::PendingQueue`]: priority-stratified LIFO of work awaiting
//!   dispatch.
//! - [`planner`]: drains the queue into bounded batches under an in-flight
//!   cap.
//! - [`handler`]: validates responses, decodes nodes via [`interfaces::TrieCodec`],
//!   and expands children.
//! - [`dependency::DependencyTracker`]: maps an unsaved hash to the parents
//!   blocked on it, and cascades saves back up the trie as children land.
//! - [`save`]: writes a node to the correct store and triggers that
//!   cascade.
//! - [`dedup::DedupCache`]: bounded LRU avoiding repeat store probes.
//! - [`progress::ProgressJournal`]: the ten-counter Progress Record,
//!   persisted alongside the code store for restartability.
//!
//! ## What this crate does not do
//!
//! Peer selection and wire encoding ([`interfaces::RequestExecutor`]),
//! persistent storage ([`interfaces::SnapshotableStore`]), and trie/account
//! decoding ([`interfaces::TrieCodec`], [`interfaces::AccountCodec`]) are
//! all external collaborators the caller supplies. This crate has no
//! opinion on peer scoring, transport framing, header sync, fork choice, or
//! incremental pruning.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use ethrex_statesync::{StateSyncConfig, SyncCore};
//!
//! let core = SyncCore::new(state_store, code_store, trie_codec, account_codec, StateSyncConfig::default());
//! core.set_executor(Arc::new(my_executor))?;
//! let cancel = tokio_util::sync::CancellationToken::new();
//! let consumed = core.sync(&cancel, root_hash).await?;
//! assert!(core.is_fully_synced(root_hash).await?);
//! ```

mod config;
mod dedup;
mod dependency;
mod error;
mod handler;
mod interfaces;
mod item;
mod metrics;
mod orchestrator;
mod planner;
mod progress;
mod queue;
mod save;

#[cfg(any(test, feature = "test-utils"))]
pub mod testutil;

pub use config::StateSyncConfig;
pub use error::{AccountCodecError, StateSyncError, StoreError, TrieCodecError};
pub use interfaces::{
    Account, AccountCodec, Batch, RequestExecutor, SnapshotableStore, TrieCodec, TrieNode,
    TrieNodeKind, EMPTY_TREE_HASH, HASH_OF_EMPTY_STRING,
};
pub use item::{AddNodeResult, NodeKind, SyncItem};
pub use metrics::SyncMetrics;
pub use orchestrator::SyncCore;
pub use progress::ProgressRecord;
