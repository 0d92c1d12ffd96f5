//! Aggregator State Store
//!
//! Durable backing for the matchmaking aggregation. The snapshot carries
//! the folded state together with the next changelog offset to consume,
//! written in one atomic rename so the offset always matches the
//! materialized state. The changelog itself is the queue-events topic;
//! recovery loads the snapshot and replays from its offset.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::matchmaking::state::MatchmakingState;

/// Snapshot file name under the state directory.
const SNAPSHOT_FILE: &str = "matchmaking-state.bin";

/// State-store failures. The aggregator halts on these and recovers from
/// the changelog on restart.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// Snapshot file I/O failed.
    #[error("state store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Snapshot (de)serialization failed.
    #[error("state store codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// Snapshot bytes do not match their checksum.
    #[error("state snapshot corrupt: checksum mismatch")]
    Corrupt,
}

/// The materialized state plus its changelog position.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// The folded matchmaking state.
    pub state: MatchmakingState,
    /// Next queue-events offset to consume.
    pub next_offset: u64,
}

#[derive(Serialize, Deserialize)]
struct SnapshotFile {
    /// Hex SHA-256 of `body`.
    checksum: String,
    body: Vec<u8>,
}

/// File-backed snapshot store.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open the store under `state_dir`, creating the directory.
    pub fn open(state_dir: &Path) -> Result<Self, StateStoreError> {
        fs::create_dir_all(state_dir)?;
        Ok(Self {
            path: state_dir.join(SNAPSHOT_FILE),
        })
    }

    /// Load the last committed snapshot, if any.
    pub fn load(&self) -> Result<Option<StateSnapshot>, StateStoreError> {
        if !self.path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&self.path)?;
        let file: SnapshotFile = bincode::deserialize(&bytes)?;

        let digest = hex::encode(Sha256::digest(&file.body));
        if digest != file.checksum {
            return Err(StateStoreError::Corrupt);
        }

        let snapshot: StateSnapshot = bincode::deserialize(&file.body)?;
        info!(
            offset = snapshot.next_offset,
            waiting = snapshot.state.waiting_len(),
            "state snapshot loaded"
        );
        Ok(Some(snapshot))
    }

    /// Atomically commit a snapshot: write to a temp file, then rename
    /// over the previous one.
    pub fn commit(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        let body = bincode::serialize(snapshot)?;
        let file = SnapshotFile {
            checksum: hex::encode(Sha256::digest(&body)),
            body,
        };
        let bytes = bincode::serialize(&file)?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::QueueEvent;

    #[test]
    fn test_load_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_commit_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        let mut state = MatchmakingState::default();
        state.apply(&QueueEvent::joined("alice".into()));
        state.apply(&QueueEvent::joined("bob".into()));
        let snapshot = StateSnapshot {
            state,
            next_offset: 2,
        };

        store.commit(&snapshot).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn test_commit_overwrites_previous() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();

        store
            .commit(&StateSnapshot {
                state: MatchmakingState::default(),
                next_offset: 1,
            })
            .unwrap();
        store
            .commit(&StateSnapshot {
                state: MatchmakingState::default(),
                next_offset: 7,
            })
            .unwrap();

        assert_eq!(store.load().unwrap().unwrap().next_offset, 7);
    }

    #[test]
    fn test_corrupt_snapshot_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path()).unwrap();
        store
            .commit(&StateSnapshot {
                state: MatchmakingState::default(),
                next_offset: 3,
            })
            .unwrap();

        // Flip checksum bytes inside the file.
        let path = dir.path().join(SNAPSHOT_FILE);
        let bytes = fs::read(&path).unwrap();
        let mut file: SnapshotFile = bincode::deserialize(&bytes).unwrap();
        file.checksum = "deadbeef".into();
        fs::write(&path, bincode::serialize(&file).unwrap()).unwrap();

        assert!(matches!(store.load(), Err(StateStoreError::Corrupt)));
    }
}
