use std::collections::HashMap;
use std::path::Path;

use derivative::Derivative;

use crate::entry::Entry;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Change {
    Created(Entry),
    Deleted(Entry),
    Updated(Entry),
}

impl Change {
    pub fn entry(&self) -> &Entry {
        match self {
            Change::Created(entry) | Change::Deleted(entry) | Change::Updated(entry) => entry,
        }
    }
}

/// Keeps track of entries of a single directory
///
/// Each call to [`ChangeTracker::poll()`] lists directory again using `relist`
/// and compares result with previous listing. Entries are compared by path only,
/// so entry that was deleted and created again with the same modification time
/// between two polls is not reported at all.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct ChangeTracker<L> {
    #[derivative(Debug = "ignore")]
    relist: L,

    snapshot: Vec<Entry>,
}

impl<L, E> ChangeTracker<L>
where
    L: FnMut() -> Result<Vec<Entry>, E>,
{
    /// Creates tracker with `snapshot` as the last known state
    pub fn new(relist: L, snapshot: Vec<Entry>) -> Self {
        ChangeTracker { relist, snapshot }
    }

    /// Lists entries again and returns all changes since last successful poll
    ///
    /// Created entries go first, then deleted and then updated ones.
    /// When listing fails, snapshot is kept, so next poll compares
    /// against the same baseline.
    pub fn poll(&mut self) -> Result<Vec<Change>, E> {
        let after = (self.relist)()?;
        let changes = diff(&self.snapshot, &after);
        self.snapshot = after;
        Ok(changes)
    }

    pub fn snapshot(&self) -> &[Entry] {
        &self.snapshot
    }

    /// Takes snapshot out of tracker, used when tracked directory is removed
    pub fn into_snapshot(self) -> Vec<Entry> {
        self.snapshot
    }
}

/// Compares two listings of the same directory
///
/// Entry that changed its kind (file replaced by a dir or vice versa)
/// is reported as deleted and created again.
pub fn diff(before: &[Entry], after: &[Entry]) -> Vec<Change> {
    let old: HashMap<&Path, &Entry> = before.iter().map(|e| (e.path(), e)).collect();
    let new: HashMap<&Path, &Entry> = after.iter().map(|e| (e.path(), e)).collect();

    let mut created = vec![];
    let mut updated = vec![];

    for entry in after {
        match old.get(entry.path()) {
            Some(prev) if prev.kind() != entry.kind() => {
                created.push(Change::Created(entry.clone()))
            }
            Some(prev) if prev.modified() != entry.modified() => {
                updated.push(Change::Updated(entry.clone()))
            }
            Some(_) => {}
            None => created.push(Change::Created(entry.clone())),
        }
    }
    let deleted = before.iter().filter(|e| match new.get(e.path()) {
        Some(current) => current.kind() != e.kind(),
        None => true,
    });

    let mut changes = created;
    changes.extend(deleted.map(|e| Change::Deleted(e.clone())));
    changes.append(&mut updated);

    changes
}
