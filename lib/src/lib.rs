#![warn(rust_2018_idioms, missing_debug_implementations)]

pub use config::WatchConfig;
pub use emitter::{Emitter, ListenerId};
pub use entry::{Entry, EntryKind};
pub use error::WatchError;
pub use exclude::{AnyOf, Exclude, Exclusions};
#[cfg(any(target_os = "linux", target_os = "macos", windows))]
pub use legacy::watch_tree;
pub use legacy::{subscribe, watch_tree_with, LegacyEvent, WatchTreeOptions};
pub use lister::{list_dir, stat_entry, stat_root};
pub use tracker::{diff, Change, ChangeTracker};
pub use tree_watcher::{EventKind, TreeEvent, TreeWatcher, TreeWatcherBuilder};
pub use walk::{flatten_dirs, DirListing};
#[cfg(any(target_os = "linux", target_os = "macos", windows))]
pub use watcher::{new_watcher, RecommendedWatcher};
pub use watcher::{RawSignal, SignalKind, WatchId, Watcher, WatcherError};

pub mod debounce;
pub mod registry;

mod config;
mod emitter;
mod entry;
mod error;
mod exclude;
mod legacy;
mod lister;
mod tracker;
mod tree_watcher;
mod walk;
mod watcher;
