//! Snapshot persistence: the sink abstraction, the versioned codec and two
//! sinks (plain JSON file, SQLite).

pub mod file;
pub mod sqlite;

use crate::core::{
    snapshot::{SNAPSHOT_FORMAT_VERSION, SnapshotEnvelope, StoreSnapshotV1},
    store::ChatStore,
};

/// Snapshot persistence failure.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("snapshot encoding: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u16),
    #[error("snapshot worker: {0}")]
    Worker(String),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// Destination for whole-store snapshots.
pub trait SnapshotSink: Send {
    /// Persists `snapshot` as the newest one.
    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1) -> PersistResult<()>;

    /// Newest persisted snapshot, if any.
    fn load_latest(&self) -> PersistResult<Option<StoreSnapshotV1>>;

    /// Store rebuilt from the newest snapshot, or empty.
    fn load_store(&self) -> PersistResult<ChatStore> {
        Ok(match self.load_latest()? {
            Some(snapshot) => ChatStore::from_snapshot(snapshot),
            None => ChatStore::new(),
        })
    }
}

#[derive(serde::Serialize)]
struct EnvelopeRef<'a> {
    format_version: u16,
    snapshot: &'a StoreSnapshotV1,
}

/// Serializes `snapshot` inside a versioned envelope.
pub fn encode_snapshot(snapshot: &StoreSnapshotV1) -> PersistResult<Vec<u8>> {
    let env = EnvelopeRef {
        format_version: SNAPSHOT_FORMAT_VERSION,
        snapshot,
    };
    Ok(serde_json::to_vec(&env)?)
}

/// Parses an envelope, rejecting formats this build does not know.
pub fn decode_snapshot(payload: &[u8]) -> PersistResult<StoreSnapshotV1> {
    let env: SnapshotEnvelope = serde_json::from_slice(payload)?;
    if env.format_version != SNAPSHOT_FORMAT_VERSION {
        return Err(PersistError::UnsupportedVersion(env.format_version));
    }
    Ok(env.snapshot)
}
