use std::path::PathBuf;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use super::StorageInterface;

/// Handle to a stored object.
///
/// Owned by the caller. The back-reference to the backend is weak, so a
/// handle outliving its backend simply stops resolving.
#[derive(Debug, Clone)]
pub struct Object {
    /// Canonical path, e.g. `/iroh/<content-id>`
    pub path: String,
    /// Display name
    pub name: String,
    pub last_modified: DateTime<Utc>,
    storage: Weak<dyn StorageInterface>,
}

impl Object {
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        last_modified: DateTime<Utc>,
        storage: Weak<dyn StorageInterface>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            last_modified,
            storage,
        }
    }

    /// The backend this object came from, if it is still alive
    pub fn storage(&self) -> Option<Arc<dyn StorageInterface>> {
        self.storage.upgrade()
    }
}

/// Result of a `get`: the caller owns the file handle and closes it by
/// dropping it.
#[derive(Debug)]
pub enum Retrieved {
    File(tokio::fs::File),
    /// Directory trees are materialized in full under the staging directory
    Directory(PathBuf),
}

impl Retrieved {
    pub fn into_file(self) -> Option<tokio::fs::File> {
        match self {
            Retrieved::File(file) => Some(file),
            Retrieved::Directory(_) => None,
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Retrieved::Directory(_))
    }
}
