use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

use widestring::{U16CString, U16String};
use windows_sys::Win32::Foundation::{CloseHandle, HANDLE, INVALID_HANDLE_VALUE};
use windows_sys::Win32::Storage::FileSystem;
use windows_sys::Win32::Storage::FileSystem::{
    ReadDirectoryChangesW, FILE_ACTION_MODIFIED, FILE_FLAG_BACKUP_SEMANTICS,
    FILE_FLAG_OVERLAPPED, FILE_LIST_DIRECTORY, FILE_NOTIFY_CHANGE_DIR_NAME,
    FILE_NOTIFY_CHANGE_FILE_NAME, FILE_NOTIFY_CHANGE_LAST_WRITE, FILE_NOTIFY_CHANGE_SIZE,
    FILE_NOTIFY_INFORMATION, FILE_SHARE_DELETE, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};

use crate::entry::EntryKind;
use crate::watcher::{RawSignal, SignalKind, WatchId, Watcher, WatcherError};

const BUFFER_LEN: usize = 48 * 1024;

/// Change reported by `ReadDirectoryChangesW`: full path and action
struct Notification {
    path: PathBuf,
    action: u32,
}

pub struct WindowsWatcher {
    rx: Receiver<Notification>,
    dir_handle: HANDLE,
    join_handle: Option<JoinHandle<()>>,
    should_stop: Arc<AtomicBool>,
    next_id: u64,
    watches: HashMap<WatchId, PathBuf>,
    by_path: HashMap<PathBuf, Vec<(WatchId, EntryKind)>>,
}

impl std::fmt::Debug for WindowsWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsWatcher")
            .field("watches", &self.watches.len())
            .finish()
    }
}

/// Creates watcher that reads changes of whole `root` subtree in background
pub fn new_watcher(root: &Path) -> Result<WindowsWatcher, WatcherError> {
    let root = if root.is_dir() {
        root
    } else {
        root.parent().unwrap_or(root)
    };
    let path = U16CString::from_os_str(root.as_os_str())
        .map_err(|_| WatcherError::UnsupportedPath(root.display().to_string()))?;

    let dir_handle = unsafe {
        FileSystem::CreateFileW(
            path.as_ptr(),
            FILE_LIST_DIRECTORY,
            FILE_SHARE_READ | FILE_SHARE_WRITE | FILE_SHARE_DELETE,
            std::ptr::null(),
            OPEN_EXISTING,
            FILE_FLAG_BACKUP_SEMANTICS | FILE_FLAG_OVERLAPPED,
            0,
        )
    };
    if dir_handle == INVALID_HANDLE_VALUE {
        return Err(WatcherError::Io(std::io::Error::last_os_error()));
    }

    let should_stop = Arc::new(AtomicBool::new(false));
    let (rx, join_handle) = watch_changes(root.into(), dir_handle, Arc::clone(&should_stop));

    Ok(WindowsWatcher {
        rx,
        dir_handle,
        join_handle: Some(join_handle),
        should_stop,
        next_id: 0,
        watches: HashMap::new(),
        by_path: HashMap::new(),
    })
}

impl WindowsWatcher {
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

impl Watcher for WindowsWatcher {
    fn add_watch(&mut self, path: &Path, kind: EntryKind) -> Result<WatchId, WatcherError> {
        //todo should check if path is actually a subpath of watched dir
        let id = WatchId::new(self.next_id);
        self.next_id += 1;

        self.by_path
            .entry(path.to_path_buf())
            .or_default()
            .push((id, kind));
        self.watches.insert(id, path.to_path_buf());
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
        let mut result = vec![];

        let notifications: Vec<_> = self.rx.try_iter().collect();
        for notification in notifications {
            if notification.action == FILE_ACTION_MODIFIED {
                self.signal(
                    &notification.path,
                    EntryKind::File,
                    SignalKind::Modify,
                    &mut result,
                );
            } else if let Some(parent) = notification.path.parent() {
                self.signal(parent, EntryKind::Dir, SignalKind::Other, &mut result);
            }
        }

        result
    }
}

impl Drop for WindowsWatcher {
    fn drop(&mut self) {
        if self.dir_handle != INVALID_HANDLE_VALUE {
            self.should_stop.store(true, Ordering::SeqCst);
            // SAFETY: handle is valid
            unsafe { CloseHandle(self.dir_handle) };
            if let Some(handle) = self.join_handle.take() {
                let _ = handle.join();
            }
        }
    }
}

fn watch_changes(
    root: PathBuf,
    dir_handle: HANDLE,
    should_stop: Arc<AtomicBool>,
) -> (Receiver<Notification>, JoinHandle<()>) {
    let (tx, rx) = std::sync::mpsc::channel();
    let join_handle = std::thread::spawn(move || {
        // u32 elements keep records dword aligned
        let mut buffer = vec![0u32; BUFFER_LEN];
        while !should_stop.load(Ordering::SeqCst) {
            let mut read = 0u32;
            // SAFETY: buffer outlives the call and its length is passed in bytes
            let status = unsafe {
                ReadDirectoryChangesW(
                    dir_handle,
                    buffer.as_mut_ptr() as *mut c_void,
                    (buffer.len() * 4) as u32,
                    1,
                    FILE_NOTIFY_CHANGE_DIR_NAME
                        | FILE_NOTIFY_CHANGE_FILE_NAME
                        | FILE_NOTIFY_CHANGE_LAST_WRITE
                        | FILE_NOTIFY_CHANGE_SIZE,
                    &mut read,
                    std::ptr::null_mut(),
                    None,
                )
            };
            if status == 0 {
                continue;
            }
            for notification in parse_records(&buffer, read as usize, &root) {
                if tx.send(notification).is_err() {
                    // watcher is dropped
                    return;
                }
            }
        }
    });

    (rx, join_handle)
}

/// Reads `FILE_NOTIFY_INFORMATION` records from first `len` bytes of `buffer`
///
/// Each record starts with offset of the next one (in bytes, 0 for the last
/// record), action and length of file name, followed by the name itself.
fn parse_records(buffer: &[u32], len: usize, root: &Path) -> Vec<Notification> {
    let header = std::mem::size_of::<FILE_NOTIFY_INFORMATION>();
    let mut notifications = vec![];
    let mut offset = 0;

    while offset + header <= len {
        // SAFETY: record is inside of filled part of the buffer and offsets are dword aligned
        let info = unsafe { &*(buffer[offset / 4..].as_ptr() as *const FILE_NOTIFY_INFORMATION) };
        // SAFETY: name length is in bytes and name directly follows the header
        let name = unsafe {
            U16String::from_ptr(info.FileName.as_ptr(), (info.FileNameLength / 2) as usize)
        };
        notifications.push(Notification {
            path: root.join(name.to_os_string()),
            action: info.Action,
        });

        if info.NextEntryOffset == 0 {
            break;
        }
        offset += info.NextEntryOffset as usize;
    }

    notifications
}
