//! Single-file JSON snapshot sink.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::core::{snapshot::StoreSnapshotV1, store::ChatStore};

use super::{PersistResult, SnapshotSink, decode_snapshot, encode_snapshot};

/// Keeps the newest snapshot in one file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotSink {
    path: PathBuf,
}

impl FileSnapshotSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotSink for FileSnapshotSink {
    fn write_snapshot(&mut self, snapshot: &StoreSnapshotV1) -> PersistResult<()> {
        let payload = encode_snapshot(snapshot)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, payload)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "snapshot written");
        Ok(())
    }

    fn load_latest(&self) -> PersistResult<Option<StoreSnapshotV1>> {
        match fs::read(&self.path) {
            Ok(payload) => decode_snapshot(&payload).map(Some),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

impl ChatStore {
    /// Writes a snapshot to `path`. Failures are logged; returns whether the
    /// write succeeded.
    pub fn write_to_path(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match FileSnapshotSink::new(path).write_snapshot(&self.to_snapshot()) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "snapshot write failed");
                false
            }
        }
    }

    /// Merges the snapshot at `path` into this store. A missing file is not an
    /// error. Failures are logged and leave the store untouched; returns
    /// whether a snapshot was restored.
    pub fn read_from_path(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match FileSnapshotSink::new(path).load_latest() {
            Ok(Some(snapshot)) => {
                self.restore(snapshot);
                true
            }
            Ok(None) => {
                debug!(path = %path.display(), "no snapshot to read");
                false
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "snapshot read failed");
                false
            }
        }
    }
}
