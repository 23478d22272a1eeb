//! Flat-file persistence of provisioned instance records.
//!
//! The state file is a JSON array of [`InstanceRecord`]. Every save replaces
//! the previous content; reuse runs read it back to skip provisioning.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::files;
use crate::records::InstanceRecord;

/// Default state file name, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = "hangar-state.json";

/// Errors raised while reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// File system access failed.
    #[error("failed to access state file {path}: {message}")]
    Io {
        /// State file path.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// The file exists but does not hold a record list.
    #[error("failed to parse state file {path}: {message}")]
    Parse {
        /// State file path.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Records could not be serialised.
    #[error("failed to serialise instance records: {0}")]
    Serialise(String),
}

/// JSON file holding the latest [`InstanceRecord`] list.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateStore {
    path: Utf8PathBuf,
}

impl StateStore {
    /// Creates a store backed by `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Overwrites the state file with `records`.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when serialisation or the write fails.
    pub fn save(&self, records: &[InstanceRecord]) -> Result<(), StateStoreError> {
        let rendered = serde_json::to_string_pretty(records)
            .map_err(|err| StateStoreError::Serialise(err.to_string()))?;
        files::write_string(&self.path, &rendered).map_err(|err| StateStoreError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Reads the records written by the last save.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError`] when the file is missing, unreadable, or
    /// malformed.
    pub fn load(&self) -> Result<Vec<InstanceRecord>, StateStoreError> {
        let contents = files::read_to_string(&self.path).map_err(|err| StateStoreError::Io {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        serde_json::from_str(&contents).map_err(|err| StateStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_STATE_FILE)
    }
}
