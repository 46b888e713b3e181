use std::io;
use std::path::Path;

use crate::entry::EntryKind;

#[cfg(target_os = "linux")]
pub use linux::{new_watcher, InotifyWatcher as RecommendedWatcher};
#[cfg(target_os = "macos")]
pub use macos::{new_watcher, FsEventWatcher as RecommendedWatcher};
#[cfg(windows)]
pub use windows::{new_watcher, WindowsWatcher as RecommendedWatcher};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(windows)]
mod windows;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// Used when unable to add inotify watch in linux
    #[error("limit of watches is reached")]
    DirLimitReached,

    #[error("path is not supported by watcher: {0}")]
    UnsupportedPath(String),

    #[error("watcher is unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Handle of a single low-level subscription
///
/// Unique only among ids issued by the same watcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct WatchId(u64);

impl WatchId {
    pub fn new(id: u64) -> Self {
        WatchId(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalKind {
    /// Content of watched file was changed
    Modify,

    /// Anything else, payload is platform specific
    Other,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RawSignal {
    pub id: WatchId,
    pub kind: SignalKind,
}

/// Low-level notification primitive
///
/// Watch of a directory reports changes of its immediate children,
/// watch of a file reports changes of its content.
pub trait Watcher: Send {
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> Result<WatchId, WatcherError>;

    /// Releases watch, ids that are unknown (or already released) are ignored
    fn remove_watch(&mut self, id: WatchId) -> Result<(), WatcherError>;

    /// Returns all signals received since last call without blocking
    fn read_events(&mut self) -> Vec<RawSignal>;
}

impl<W: Watcher + ?Sized> Watcher for Box<W> {
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> Result<WatchId, WatcherError> {
        (**self).add_watch(path, kind)
    }

    fn remove_watch(&mut self, id: WatchId) -> Result<(), WatcherError> {
        (**self).remove_watch(id)
    }

    fn read_events(&mut self) -> Vec<RawSignal> {
        (**self).read_events()
    }
}
