use std::fs;
use std::path::Path;

use crate::entry::Entry;
use crate::exclude::Exclude;
use crate::WatchError;

/// Lists immediate children of `dir`
///
/// Excluded children are filtered out before they are stated.
/// If child vanished before it could be stated, `WatchError::Vanished`
/// with path of that child is returned.
pub fn list_dir<E: Exclude + ?Sized>(dir: &Path, exclude: &E) -> Result<Vec<Entry>, WatchError> {
    let read_dir = fs::read_dir(dir).map_err(|e| WatchError::from_io(dir, e))?;

    let mut entries = vec![];
    for child in read_dir {
        let child = child.map_err(|e| WatchError::from_io(dir, e))?;
        let path = child.path();
        if exclude.is_excluded(&path) {
            continue;
        }
        // doesn't follow symlinks
        let metadata = child.metadata().map_err(|e| WatchError::from_io(&path, e))?;
        entries.push(Entry::from_metadata(path, &metadata));
    }

    Ok(entries)
}

/// Stats single path
///
/// Missing path is reported as `WatchError::NotFound`.
pub fn stat_entry(path: &Path) -> Result<Entry, WatchError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| not_found(path, e))?;
    Ok(Entry::from_metadata(path.to_path_buf(), &metadata))
}

/// Stats root of a tree, symlink is resolved so linked dir is watched as dir
///
/// Entry keeps the path of the link itself.
pub fn stat_root(path: &Path) -> Result<Entry, WatchError> {
    let metadata = fs::metadata(path).map_err(|e| not_found(path, e))?;
    Ok(Entry::from_metadata(path.to_path_buf(), &metadata))
}

fn not_found(path: &Path, error: std::io::Error) -> WatchError {
    match WatchError::from_io(path, error) {
        WatchError::Vanished(path) => WatchError::NotFound(path),
        e => e,
    }
}
