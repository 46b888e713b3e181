use std::io;
use std::path::{Path, PathBuf};

use crate::watcher::WatcherError;

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// Root path is missing, fatal for `init`
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Entry disappeared between being listed and being stat'ed
    #[error("entry vanished while scanning: {}", .0.display())]
    Vanished(PathBuf),

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: WatcherError,
    },

    #[error("failed to release watch of {}: {source}", path.display())]
    Release {
        path: PathBuf,
        #[source]
        source: WatcherError,
    },

    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("watcher is already initialized")]
    AlreadyInitialized,

    #[error("watcher was ended")]
    Ended,
}

impl WatchError {
    /// Classifies io error that happened while reading or stating `path`
    pub fn from_io(path: &Path, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => WatchError::Vanished(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => WatchError::PermissionDenied(path.to_path_buf()),
            _ => WatchError::Io {
                path: path.to_path_buf(),
                source: err,
            },
        }
    }

    /// Returns `true` for errors caused by entries disappearing during a scan
    ///
    /// Such errors are tolerated silently.
    pub fn is_vanished(&self) -> bool {
        matches!(self, WatchError::Vanished(_))
    }
}
