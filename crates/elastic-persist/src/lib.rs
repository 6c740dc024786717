//! JSON file-backed persistence.
//!
//! A [`JsonStore`] owns one `<name>.json` file under a state directory and
//! snapshots a whole serializable value into it. Writes go to a temporary
//! sibling file first and are renamed into place, so a crash mid-write never
//! leaves a truncated snapshot behind.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

/// Result type for persistence operations.
pub type Result<T> = std::result::Result<T, PersistError>;

/// Errors raised while reading or writing a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    /// Filesystem access failed.
    #[error("io error on {path}: {reason}")]
    Io {
        /// File or directory involved.
        path: String,
        /// Underlying error message.
        reason: String,
    },

    /// The snapshot could not be encoded or decoded.
    #[error("serialization error in store '{name}': {reason}")]
    Serialization {
        /// Store name.
        name: String,
        /// Underlying error message.
        reason: String,
    },
}

impl PersistError {
    fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// A named JSON snapshot file under a state directory.
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
    name: String,
}

impl JsonStore {
    /// Creates a store writing `<state_path>/<name>.json`.
    pub fn new(state_path: &Path, name: &str) -> Self {
        Self {
            dir: state_path.to_path_buf(),
            name: name.to_string(),
        }
    }

    /// Store name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the snapshot file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.json", self.name))
    }

    /// Loads the snapshot, falling back to `T::default()` when the file is
    /// missing or unreadable.
    pub fn load<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => {
                debug!(store = %self.name, "no snapshot on disk, starting empty");
                T::default()
            }
            Err(e) => {
                warn!(store = %self.name, error = %e, "failed to load snapshot, starting empty");
                T::default()
            }
        }
    }

    /// Loads the snapshot, returning `None` when the file does not exist.
    pub fn try_load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        let path = self.path();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PersistError::io(&path, &e)),
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| PersistError::Serialization {
                name: self.name.clone(),
                reason: e.to_string(),
            })
    }

    /// Writes the snapshot atomically.
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| PersistError::io(&self.dir, &e))?;

        let json = serde_json::to_string_pretty(value).map_err(|e| {
            PersistError::Serialization {
                name: self.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let path = self.path();
        let tmp = self.dir.join(format!(".{}.json.tmp", self.name));
        fs::write(&tmp, json).map_err(|e| PersistError::io(&tmp, &e))?;
        fs::rename(&tmp, &path).map_err(|e| PersistError::io(&path, &e))?;

        debug!(store = %self.name, path = %path.display(), "snapshot saved");
        Ok(())
    }
}
