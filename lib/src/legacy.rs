use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use crate::config::WatchConfig;
use crate::emitter::ListenerId;
use crate::tree_watcher::{TreeEvent, TreeWatcher, TreeWatcherBuilder};
#[cfg(any(target_os = "linux", target_os = "macos", windows))]
use crate::watcher::RecommendedWatcher;
use crate::watcher::Watcher;
use crate::WatchError;

/// Flat form of [`TreeEvent`] for consumers that use single callback
///
/// Both creation and change of a file are reported as modification.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LegacyEvent {
    pub name: PathBuf,
    pub is_directory: bool,
    pub is_create: bool,
    pub is_delete: bool,
    pub is_modify: bool,
}

impl From<&TreeEvent> for LegacyEvent {
    fn from(event: &TreeEvent) -> Self {
        let (is_create, is_delete, is_modify) = match event {
            TreeEvent::DirCreate(_) => (true, false, false),
            TreeEvent::FileCreate(_) | TreeEvent::FileChange(_) => (false, false, true),
            TreeEvent::FileDelete(_) | TreeEvent::DirDelete(_) => (false, true, false),
        };
        LegacyEvent {
            name: event.entry().path().to_path_buf(),
            is_directory: event.entry().is_dir(),
            is_create,
            is_delete,
            is_modify,
        }
    }
}

impl Display for LegacyEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let action = if self.is_create {
            "create"
        } else if self.is_delete {
            "delete"
        } else {
            "modify"
        };
        let kind = if self.is_directory { "dir" } else { "file" };
        write!(f, "{} {} {}", action, kind, self.name.display())
    }
}

#[derive(Clone, Debug, Default)]
pub struct WatchTreeOptions {
    pub exclude: Vec<String>,
    pub config: WatchConfig,
}

impl WatchTreeOptions {
    fn builder(self) -> TreeWatcherBuilder {
        self.exclude
            .into_iter()
            .fold(TreeWatcherBuilder::new().config(self.config), |builder, pattern| {
                builder.exclude(pattern)
            })
    }
}

/// Subscribes `callback` to every event of `watcher` in legacy form
pub fn subscribe<W, F>(watcher: &TreeWatcher<W>, callback: F) -> ListenerId
where
    W: Watcher + 'static,
    F: Fn(&LegacyEvent) + Send + Sync + 'static,
{
    watcher.on_event(move |event| callback(&LegacyEvent::from(event)))
}

/// Starts watching `dir`, every event is passed to `callback`
///
/// Returned watcher is already initialized, so creation of every
/// existing entry is reported before this returns.
#[cfg(any(target_os = "linux", target_os = "macos", windows))]
pub fn watch_tree<P, F>(
    dir: P,
    options: WatchTreeOptions,
    callback: F,
) -> Result<TreeWatcher<RecommendedWatcher>, WatchError>
where
    P: AsRef<Path>,
    F: Fn(&LegacyEvent) + Send + Sync + 'static,
{
    let watcher = options.builder().build(dir)?;
    subscribe(&watcher, callback);
    watcher.init()?;
    Ok(watcher)
}

/// Same as [`watch_tree`] but with provided backend
pub fn watch_tree_with<P, W, F>(
    dir: P,
    watcher: W,
    options: WatchTreeOptions,
    callback: F,
) -> Result<TreeWatcher<W>, WatchError>
where
    P: AsRef<Path>,
    W: Watcher + 'static,
    F: Fn(&LegacyEvent) + Send + Sync + 'static,
{
    let watcher = options.builder().build_with(dir, watcher)?;
    subscribe(&watcher, callback);
    watcher.init()?;
    Ok(watcher)
}
