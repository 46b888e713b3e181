use std::path::{Path, PathBuf};

use crate::entry::{Entry, EntryKind};
use crate::exclude::Exclude;
use crate::lister::{list_dir, stat_root};
use crate::WatchError;

/// Directory together with its filtered children
#[derive(Clone, Debug)]
pub struct DirListing {
    pub path: PathBuf,
    pub entries: Vec<Entry>,
}

/// Lists every directory under `root` (and root itself), depth first
///
/// Children are sorted by path. Any failure aborts the walk.
/// If `root` is a file, nothing is listed.
pub fn flatten_dirs<E: Exclude + ?Sized>(
    root: &Path,
    exclude: &E,
) -> Result<Vec<DirListing>, WatchError> {
    if stat_root(root)?.kind() == EntryKind::File {
        return Ok(vec![]);
    }

    let mut result = vec![];
    let mut queue = vec![root.to_path_buf()];
    while let Some(dir) = queue.pop() {
        let mut entries = list_dir(&dir, exclude)?;
        entries.sort_by(|a, b| a.path().cmp(b.path()));
        queue.extend(
            entries
                .iter()
                .rev()
                .filter(|e| e.is_dir())
                .map(|e| e.path().to_path_buf()),
        );
        result.push(DirListing { path: dir, entries });
    }

    Ok(result)
}
