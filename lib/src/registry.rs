use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::entry::{Entry, EntryKind};
use crate::watcher::{SignalKind, WatchId, Watcher, WatcherError};

/// Signal routed to the path it was subscribed for
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Signal {
    pub path: PathBuf,
    pub entry_kind: EntryKind,
    pub kind: SignalKind,
}

#[derive(Clone, Debug)]
struct Subscription {
    path: PathBuf,
    kind: EntryKind,
    identity: Option<u64>,
}

/// Keeps all active low-level subscriptions
///
/// Attaching the same path twice creates two subscriptions, it is up to
/// the caller to avoid it. Every subscription is released at most once.
#[derive(Debug)]
pub struct WatchRegistry<W> {
    watcher: W,
    subscriptions: HashMap<WatchId, Subscription>,
    paths: HashMap<PathBuf, Vec<WatchId>>,
}

impl<W: Watcher> WatchRegistry<W> {
    pub fn new(watcher: W) -> Self {
        WatchRegistry {
            watcher,
            subscriptions: HashMap::new(),
            paths: HashMap::new(),
        }
    }

    pub fn attach(&mut self, entry: &Entry) -> Result<WatchId, WatcherError> {
        let id = self.watcher.add_watch(entry.path(), entry.kind())?;
        log::debug!("Watching {} {}", entry.kind().as_str(), entry.path().display());

        self.subscriptions.insert(
            id,
            Subscription {
                path: entry.path().to_path_buf(),
                kind: entry.kind(),
                identity: entry.identity(),
            },
        );
        self.paths
            .entry(entry.path().to_path_buf())
            .or_default()
            .push(id);
        Ok(id)
    }

    /// Releases all subscriptions of `path`
    ///
    /// Returns `Ok(false)` if path was not watched. Subscriptions are
    /// forgotten even if releasing them failed.
    pub fn detach(&mut self, path: &Path) -> Result<bool, WatcherError> {
        let Some(ids) = self.paths.remove(path) else {
            return Ok(false);
        };
        log::debug!("Unwatching {}", path.display());

        let mut result = Ok(true);
        for id in ids {
            self.subscriptions.remove(&id);
            if let Err(e) = self.watcher.remove_watch(id) {
                result = Err(e);
            }
        }
        result
    }

    /// Releases every subscription that is still active
    ///
    /// Failures don't stop releasing of remaining subscriptions,
    /// they are returned together with the path they belong to.
    pub fn detach_all(&mut self) -> Vec<(PathBuf, WatcherError)> {
        let mut errors = vec![];
        let mut subscriptions: Vec<_> = self.subscriptions.drain().collect();
        subscriptions.sort_by_key(|(id, _)| *id);
        self.paths.clear();

        for (id, subscription) in subscriptions {
            if let Err(e) = self.watcher.remove_watch(id) {
                errors.push((subscription.path, e));
            }
        }
        errors
    }

    /// Reads pending signals and routes them to subscribed paths
    ///
    /// Signals of already released subscriptions are dropped.
    pub fn read_signals(&mut self) -> Vec<Signal> {
        self.watcher
            .read_events()
            .into_iter()
            .filter_map(|raw| {
                self.subscriptions.get(&raw.id).map(|s| Signal {
                    path: s.path.clone(),
                    entry_kind: s.kind,
                    kind: raw.kind,
                })
            })
            .collect()
    }

    pub fn is_watched(&self, path: &Path) -> bool {
        self.paths.contains_key(path)
    }

    /// Identity of watched entry at the time it was attached
    pub fn identity(&self, path: &Path) -> Option<u64> {
        let id = self.paths.get(path)?.first()?;
        self.subscriptions.get(id)?.identity
    }

    /// Number of active subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn watched_paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.keys().map(|p| p.as_path())
    }
}
