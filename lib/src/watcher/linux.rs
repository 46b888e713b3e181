use std::collections::HashMap;
use std::io;
use std::path::Path;

use inotify::{EventMask, Inotify, WatchDescriptor, WatchMask};
use nix::libc::{EINVAL, ENOSPC};

use crate::entry::EntryKind;
use crate::watcher::{RawSignal, SignalKind, WatchId, Watcher, WatcherError};

const BUFFER_LEN: usize = 64 * 1024;

pub struct InotifyWatcher {
    inotify: Inotify,
    buffer: Vec<u8>,
    next_id: u64,
    watches: HashMap<WatchId, WatchDescriptor>,

    /// Hard links to the same file share single descriptor
    descriptors: HashMap<WatchDescriptor, Vec<WatchId>>,
}

impl std::fmt::Debug for InotifyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InotifyWatcher")
            .field("watches", &self.watches.len())
            .field("descriptors", &self.descriptors.len())
            .finish()
    }
}

/// Creates inotify based watcher, root is not watched until added explicitly
pub fn new_watcher(_root: &Path) -> Result<InotifyWatcher, WatcherError> {
    let inotify = Inotify::init()?;

    Ok(InotifyWatcher {
        inotify,
        buffer: vec![0; BUFFER_LEN],
        next_id: 0,
        watches: HashMap::new(),
        descriptors: HashMap::new(),
    })
}

impl InotifyWatcher {
    fn retire(&mut self, wd: &WatchDescriptor) {
        if let Some(ids) = self.descriptors.remove(wd) {
            for id in ids {
                self.watches.remove(&id);
            }
        }
    }
}

impl Watcher for InotifyWatcher {
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> Result<WatchId, WatcherError> {
        //not using DELETE_SELF and MOVE_SELF since these events should be detected by parent directory
        // symlinks are files, their watch must stay on the link and not on its target
        // (root dir can be a link and is followed)
        let mask = match kind {
            EntryKind::Dir => WatchMask::MOVE | WatchMask::CREATE | WatchMask::DELETE,
            EntryKind::File => WatchMask::MODIFY | WatchMask::DONT_FOLLOW,
        };
        let wd = self.inotify.add_watch(path, mask).map_err(|e| {
            if e.raw_os_error() == Some(ENOSPC) {
                WatcherError::DirLimitReached
            } else {
                WatcherError::Io(e)
            }
        })?;

        let id = WatchId::new(self.next_id);
        self.next_id += 1;
        self.watches.insert(id, wd.clone());
        self.descriptors.entry(wd).or_default().push(id);

        Ok(id)
    }

    fn remove_watch(&mut self, id: WatchId) -> Result<(), WatcherError> {
        let Some(wd) = self.watches.remove(&id) else {
            return Ok(());
        };
        let ids = self.descriptors.entry(wd.clone()).or_default();
        ids.retain(|&i| i != id);
        if !ids.is_empty() {
            return Ok(());
        }
        self.descriptors.remove(&wd);

        match self.inotify.rm_watch(wd) {
            Ok(()) => Ok(()),
            // kernel already removed watch (file was deleted) but IGNORED event is not read yet
            Err(e) if e.raw_os_error() == Some(EINVAL) => Ok(()),
            Err(e) => Err(WatcherError::Io(e)),
        }
    }

    fn read_events(&mut self) -> Vec<RawSignal> {
        let mut result = vec![];
        let mut retired = vec![];

        match self.inotify.read_events(&mut self.buffer) {
            Ok(events) => {
                for event in events {
                    if event.mask.contains(EventMask::Q_OVERFLOW) {
                        // some events were lost, so everything must be checked again
                        result.extend(self.watches.keys().map(|&id| RawSignal {
                            id,
                            kind: SignalKind::Other,
                        }));
                        continue;
                    }
                    if event.mask.contains(EventMask::IGNORED) {
                        // watch was removed so remove it from our map
                        retired.push(event.wd);
                        continue;
                    }
                    let kind = if event.mask.contains(EventMask::MODIFY) {
                        SignalKind::Modify
                    } else {
                        SignalKind::Other
                    };
                    if let Some(ids) = self.descriptors.get(&event.wd) {
                        result.extend(ids.iter().map(|&id| RawSignal { id, kind }));
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => log::warn!("Failed to read inotify events: {}", e),
        }

        for wd in retired {
            self.retire(&wd);
        }

        result
    }
}
