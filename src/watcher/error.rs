//! Error types for the live-reload watch engine.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watch engine operations.
///
/// Fatal conditions only: background failures (per-entry walk errors, watcher
/// internal errors, broadcasts to a full channel) are deliberately swallowed
/// at their call sites and never surface here.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("project path is empty")]
    EmptyPath,

    #[error("project path does not exist or is not readable: {path}")]
    PathNotFound { path: PathBuf },

    #[error("failed to initialize watcher: {0}")]
    InitFailed(#[from] notify::Error),

    #[error("failed to bind listener on 127.0.0.1:{port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("listener did not drain within the shutdown deadline")]
    ShutdownTimeout,
}
