use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use dynoscope_types::App;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),

    #[error("snapshot decode: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Persisted tracked-application set.
///
/// An ordered list of `(name, app)` pairs at a fixed location, read once on
/// startup so the tree renders before the platform is consulted. Rewritten
/// atomically after every successful tracked-set reconciliation; deleted on
/// authentication loss and not rewritten until a new diff arrives.
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the snapshot; a missing file is an empty set, not an error
    pub fn load(&self) -> Result<Vec<(String, App)>, SnapshotError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the snapshot atomically (write-then-rename)
    pub fn save(&self, entries: &[(String, App)]) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Remove the snapshot. Idempotent; a missing file is fine.
    pub fn delete(&self) -> Result<(), SnapshotError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
