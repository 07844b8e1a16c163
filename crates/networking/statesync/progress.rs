use std::sync::LazyLock;

use ethereum_types::H256;
use tiny_keccak::{Hasher as _, Keccak};

use crate::error::StoreError;
use crate::interfaces::SnapshotableStore;

/// Well-known key the Progress Record is persisted under in the code store:
/// `hash("fast_sync_progress")`.
pub static PROGRESS_KEY: LazyLock<H256> = LazyLock::new(|| {
    let mut hasher = Keccak::v256();
    let mut out = [0u8; 32];
    hasher.update(b"fast_sync_progress");
    hasher.finalize(&mut out);
    H256::from(out)
});

const FIELD_COUNT: usize = 10;

/// The ten persisted counters, in declaration order. Every
/// counter is non-decreasing across successful batches; a restart resumes
/// from whatever was last committed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressRecord {
    pub consumed: u64,
    pub saved_storage: u64,
    pub saved_state: u64,
    pub saved_nodes: u64,
    pub saved_accounts: u64,
    pub saved_code: u64,
    pub requested: u64,
    pub db_checks: u64,
    pub state_was_there: u64,
    pub state_was_not_there: u64,
}

impl ProgressRecord {
    /// Sequence-encodes the ten counters as big-endian `u64`s, in
    /// declaration order, with no framing: a fixed 80-byte record.
    pub fn encode(&self) -> Vec<u8> {
        let fields = [
            self.consumed,
            self.saved_storage,
            self.saved_state,
            self.saved_nodes,
            self.saved_accounts,
            self.saved_code,
            self.requested,
            self.db_checks,
            self.state_was_there,
            self.state_was_not_there,
        ];
        let mut out = Vec::with_capacity(FIELD_COUNT * 8);
        for field in fields {
            out.extend_from_slice(&field.to_be_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != FIELD_COUNT * 8 {
            return None;
        }
        let mut fields = [0u64; FIELD_COUNT];
        for (i, chunk) in bytes.chunks_exact(8).enumerate() {
            fields[i] = u64::from_be_bytes(chunk.try_into().ok()?);
        }
        Some(ProgressRecord {
            consumed: fields[0],
            saved_storage: fields[1],
            saved_state: fields[2],
            saved_nodes: fields[3],
            saved_accounts: fields[4],
            saved_code: fields[5],
            requested: fields[6],
            db_checks: fields[7],
            state_was_there: fields[8],
            state_was_not_there: fields[9],
        })
    }
}

/// Loads and persists the [`ProgressRecord`] under [`PROGRESS_KEY`] in the
/// code store. Committing the record is always the caller's responsibility
/// to sequence correctly relative to the two stores' own commits — see
/// crash-safety argument behind that ordering.
pub struct ProgressJournal;

impl ProgressJournal {
    pub async fn load(code_store: &dyn SnapshotableStore) -> Result<ProgressRecord, StoreError> {
        match code_store.get(PROGRESS_KEY.as_bytes()).await? {
            Some(bytes) => Ok(ProgressRecord::decode(&bytes).unwrap_or_default()),
            None => Ok(ProgressRecord::default()),
        }
    }

    pub async fn commit(
        code_store: &dyn SnapshotableStore,
        record: &ProgressRecord,
    ) -> Result<(), StoreError> {
        code_store
            .put_indexed(PROGRESS_KEY.as_bytes(), record.encode())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let record = ProgressRecord {
            consumed: 1,
            saved_storage: 2,
            saved_state: 3,
            saved_nodes: 4,
            saved_accounts: 5,
            saved_code: 6,
            requested: 7,
            db_checks: 8,
            state_was_there: 9,
            state_was_not_there: 10,
        };
        let encoded = record.encode();
        assert_eq!(encoded.len(), FIELD_COUNT * 8);
        assert_eq!(ProgressRecord::decode(&encoded), Some(record));
    }

    #[test]
    fn rejects_malformed_length() {
        assert_eq!(ProgressRecord::decode(&[0u8; 3]), None);
    }
}
