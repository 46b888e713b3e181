use std::fmt::{Display, Formatter};
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EntryKind {
    File,
    Dir,
}

impl EntryKind {
    /// Short name used in log messages
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Dir => "dir",
        }
    }
}

/// Represents a file (or dir) as it was seen by the last listing of its parent
///
/// Two entries are considered the same entry when their paths are equal,
/// `identity` is informational only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    path: PathBuf,
    kind: EntryKind,
    modified: DateTime<Utc>,
    identity: Option<u64>,
}

impl Entry {
    pub fn new<P: Into<PathBuf>>(path: P, kind: EntryKind, modified: DateTime<Utc>) -> Self {
        Entry {
            path: path.into(),
            kind,
            modified,
            identity: None,
        }
    }

    /// Builds entry from already retrieved metadata
    ///
    /// Symlinks are classified as files, so cycles created by links
    /// are never followed.
    pub fn from_metadata(path: PathBuf, metadata: &Metadata) -> Self {
        let kind = if metadata.is_dir() && !metadata.is_symlink() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        // some filesystems don't report mtime, treat them as never modified
        let modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Entry {
            path,
            kind,
            modified,
            identity: identity(metadata),
        }
    }

    pub fn with_identity(mut self, identity: u64) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get filename of this entry
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn identity(&self) -> Option<u64> {
        self.identity
    }
}

impl Display for Entry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[cfg(unix)]
fn identity(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn identity(_metadata: &Metadata) -> Option<u64> {
    None
}
