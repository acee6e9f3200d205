//! SQLite-backed snapshot history.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use crate::core::snapshot::{SNAPSHOT_FORMAT_VERSION, StoreSnapshotV1};

use super::{PersistResult, SnapshotSink, decode_snapshot, encode_snapshot};

/// SQLite implementation of [`crate::persist::SnapshotSink`].
///
/// Every write adds a row; older rows beyond `keep` are pruned in the same
/// transaction.
pub struct SqliteSnapshotSink {
    conn: Connection,
    keep: usize,
}

impl SqliteSnapshotSink {
    /// Opens or creates a SQLite-backed sink at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> PersistResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite sink.
    pub fn open_in_memory() -> PersistResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    /// Number of snapshots retained after each write (minimum one).
    pub fn with_retention(mut self, keep: usize) -> Self {
        self.keep = keep.max(1);
        self
    }

    fn init_connection(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn, keep: 4 })
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> PersistResult<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Deletes all but the newest `keep` snapshots (at least one survives).
    pub fn prune(&mut self, keep: usize) -> PersistResult<usize> {
        prune_rows(&self.conn, keep.max(1))
    }

    pub fn flush(&mut self) -> PersistResult<()> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

impl SnapshotSink for SqliteSnapshotSink {
    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1) -> PersistResult<()> {
        let payload = encode_snapshot(snapshot)?;
        let keep = self.keep;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO snapshots(ts_ms, format_version, chats, messages, payload) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                now_ms() as i64,
                SNAPSHOT_FORMAT_VERSION,
                snapshot.chats.len() as i64,
                snapshot.message_count() as i64,
                payload,
            ],
        )?;
        let pruned = prune_rows(&tx, keep)?;
        tx.commit()?;

        debug!(pruned, "snapshot row written");
        Ok(())
    }

    fn load_latest(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        let payload: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT payload FROM snapshots ORDER BY id DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        payload.map(|p| decode_snapshot(&p)).transpose()
    }
}

fn prune_rows(conn: &Connection, keep: usize) -> PersistResult<usize> {
    let removed = conn.execute(
        "DELETE FROM snapshots WHERE id NOT IN \
         (SELECT id FROM snapshots ORDER BY id DESC LIMIT ?1)",
        params![keep as i64],
    )?;
    Ok(removed)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
