use ethereum_types::H256;

/// Errors surfaced by the state-sync core.
///
/// Mirrors the shape of `ethrex_p2p::sync::SyncError`: collaborator errors are
/// wrapped transparently, while failures that originate in this crate get a
/// named variant so callers can match on them instead of string-sniffing.
#[derive(Debug, thiserror::Error)]
pub enum StateSyncError {
    #[error("peer returned no responses for the in-flight batch")]
    PeerReturnedNothing,

    #[error("peer returned data that does not hash to the requested hash {0:?}")]
    InvalidPeerData(H256),

    #[error("invariant broken: {0}")]
    InvariantBroken(&'static str),

    #[error("sync was canceled")]
    Canceled,

    #[error("trie node decoded to an unknown/unsupported kind")]
    UnknownNodeKind,

    #[error("executor is already bound to a sync in progress")]
    ExecutorAlreadyRunning,

    #[error("no request executor has been configured; call set_executor first")]
    NoExecutorConfigured,

    #[error(transparent)]
    TrieCodec(#[from] TrieCodecError),

    #[error(transparent)]
    AccountCodec(#[from] AccountCodecError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl StateSyncError {
    /// Whether the caller can recover by re-queueing the last batch and
    /// retrying (possibly against a different peer/executor), as opposed to
    /// aborting the whole sync session.
    ///
    /// `InvariantBroken` and `UnknownNodeKind` indicate a logic or codec bug
    /// and are never recoverable; cancellation is a deliberate stop, not a
    /// failure to recover from.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StateSyncError::PeerReturnedNothing | StateSyncError::InvalidPeerData(_)
        )
    }
}

/// Error returned by a [`crate::interfaces::TrieCodec`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum TrieCodecError {
    #[error("malformed trie node encoding: {0}")]
    Malformed(String),
}

/// Error returned by a [`crate::interfaces::AccountCodec`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum AccountCodecError {
    #[error("malformed account leaf encoding: {0}")]
    Malformed(String),
}

/// Error returned by a [`crate::interfaces::SnapshotableStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}
