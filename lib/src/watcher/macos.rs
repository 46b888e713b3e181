use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use fsevent::{Event, FsEvent, StreamFlags};

use crate::entry::EntryKind;
use crate::watcher::{RawSignal, SignalKind, WatchId, Watcher, WatcherError};

pub struct FsEventWatcher {
    fsevent: FsEvent,
    rx: Receiver<Event>,
    next_id: u64,
    watches: HashMap<WatchId, PathBuf>,

    /// FSEvents reports canonical paths, so watches are indexed by them
    by_path: HashMap<PathBuf, Vec<(WatchId, EntryKind)>>,
}

impl std::fmt::Debug for FsEventWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsEventWatcher")
            .field("watches", &self.watches.len())
            .finish()
    }
}

/// Creates watcher with single event stream over `root`
///
/// Only paths inside of root can be watched later.
pub fn new_watcher(root: &Path) -> Result<FsEventWatcher, WatcherError> {
    let stream_root = if root.is_dir() {
        root
    } else {
        root.parent().unwrap_or(root)
    };
    let stream_root = canonical(stream_root);
    let stream_root = stream_root
        .to_str()
        .ok_or_else(|| WatcherError::UnsupportedPath(stream_root.display().to_string()))?;

    let (tx, rx) = std::sync::mpsc::channel();
    let mut fsevent = FsEvent::new(vec![stream_root.to_string()]);
    fsevent
        .observe_async(tx)
        .map_err(|e| WatcherError::Unavailable(format!("{:?}", e)))?;

    Ok(FsEventWatcher {
        fsevent,
        rx,
        next_id: 0,
        watches: HashMap::new(),
        by_path: HashMap::new(),
    })
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

impl FsEventWatcher {
    fn signal(&self, path: &Path, kind: EntryKind, signal: SignalKind, out: &mut Vec<RawSignal>) {
        if let Some(ids) = self.by_path.get(path) {
            out.extend(
                ids.iter()
                    .filter(|(_, k)| *k == kind)
                    .map(|&(id, _)| RawSignal { id, kind: signal }),
            );
        }
    }
}

impl Watcher for FsEventWatcher {
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> Result<WatchId, WatcherError> {
        //todo should check if path is actually a subpath of watched dir
        let path = canonical(path);
        let id = WatchId::new(self.next_id);
        self.next_id += 1;

        self.by_path.entry(path.clone()).or_default().push((id, kind));
        self.watches.insert(id, path);
        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) -> Result<(), WatcherError> {
        if let Some(path) = self.watches.remove(&id) {
            if let Some(ids) = self.by_path.get_mut(&path) {
                ids.retain(|(i, _)| *i != id);
                if ids.is_empty() {
                    self.by_path.remove(&path);
                }
            }
        }
        Ok(())
    }

    fn read_events(&mut self) -> Vec<RawSignal> {
        let structure = StreamFlags::from_iter(
            vec![
                StreamFlags::ITEM_CREATED,
                StreamFlags::ITEM_CLONED,
                StreamFlags::ITEM_REMOVED,
                StreamFlags::ITEM_RENAMED,
            ]
            .into_iter(),
        );
        let rescan = StreamFlags::MUST_SCAN_SUBDIRS
            | StreamFlags::USER_DROPPED
            | StreamFlags::KERNEL_DROPPED;

        let mut result = vec![];

        let events: Vec<_> = self.rx.try_iter().collect();
        for event in events {
            if event.flag.intersects(rescan) {
                // stream lost events, everything must be checked again
                result.extend(self.watches.keys().map(|&id| RawSignal {
                    id,
                    kind: SignalKind::Other,
                }));
                continue;
            }

            let path = PathBuf::from(event.path);
            if event.flag.contains(StreamFlags::ITEM_MODIFIED) {
                self.signal(&path, EntryKind::File, SignalKind::Modify, &mut result);
            }
            if event.flag.intersects(structure) {
                if let Some(parent) = path.parent() {
                    self.signal(parent, EntryKind::Dir, SignalKind::Other, &mut result);
                }
            }
        }

        result
    }
}

// SAFETY: the only non-Send field is run loop reference inside of `FsEvent`
// which is used only to stop the loop, and CFRunLoopStop can be called from any thread
unsafe impl Send for FsEventWatcher {}

impl Drop for FsEventWatcher {
    fn drop(&mut self) {
        self.fsevent.shutdown_observe();
    }
}
