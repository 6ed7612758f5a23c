//! Project records consumed by the live-reload engine.
//!
//! A project is a user-defined local site: a stable id, a filesystem root to
//! watch, and an optional document-root hint for the entry-file injector. The
//! engine treats these records as read-only input; how they are stored is the
//! caller's concern.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::watcher::WatchError;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Project {
    /// Stable identifier, unique across all enabled projects. Used as the
    /// routing key for both watch state and event-stream subscriptions.
    pub id: String,

    /// Absolute filesystem root to watch recursively.
    pub path: PathBuf,

    /// Directory under `path` serving as the HTTP document root, if any.
    /// Consumed only by the injector, not the watch engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_root: Option<String>,
}

impl Project {
    /// Build a project record for a directory, deriving the id from the
    /// directory name.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, WatchError> {
        let dir = dir.as_ref();
        let path = dir.canonicalize().map_err(|_| WatchError::PathNotFound {
            path: dir.to_path_buf(),
        })?;
        let id = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WatchError::PathNotFound {
                path: path.clone(),
            })?;
        Ok(Self {
            id,
            path,
            document_root: None,
        })
    }
}
