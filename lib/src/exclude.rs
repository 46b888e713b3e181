use std::path::{Path, PathBuf};
use std::sync::Arc;

use derivative::Derivative;
use regex::Regex;

use crate::WatchError;

/// Predicate deciding which entries are never listed, stated, watched or
/// recursed into
pub trait Exclude: Send + Sync {
    fn is_excluded(&self, path: &Path) -> bool;
}

impl<F> Exclude for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_excluded(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Set of exclude patterns
///
/// Relative patterns are regular expressions matched against the file name
/// of an entry (so `"#"` excludes `.#file.txt` and `"b4"` excludes `b4`
/// at any depth). Absolute patterns exclude exactly that path.
#[derive(Clone, Debug, Default)]
pub struct Exclusions {
    names: Vec<Regex>,
    paths: Vec<PathBuf>,
}

impl Exclusions {
    pub fn new<I, S>(patterns: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exclusions = Exclusions::default();
        for pattern in patterns {
            exclusions.add(pattern.as_ref())?;
        }
        Ok(exclusions)
    }

    /// Adds new pattern to this set
    pub fn add(&mut self, pattern: &str) -> Result<(), WatchError> {
        let path = Path::new(pattern);
        if path.is_absolute() {
            self.paths.push(path.to_path_buf());
        } else {
            self.names.push(Regex::new(pattern)?);
        }
        Ok(())
    }

    /// Adds already compiled regex that is matched against file names
    pub fn add_regex(&mut self, regex: Regex) {
        self.names.push(regex);
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.paths.is_empty()
    }
}

impl Exclude for Exclusions {
    fn is_excluded(&self, path: &Path) -> bool {
        if self.paths.iter().any(|p| p == path) {
            return true;
        }
        // names that are not valid unicode are matched lossy
        match path.file_name() {
            Some(name) => {
                let name = name.to_string_lossy();
                self.names.iter().any(|r| r.is_match(&name))
            }
            None => false,
        }
    }
}

/// Excludes path if any of inner predicates excludes it
#[derive(Clone, Default, Derivative)]
#[derivative(Debug)]
pub struct AnyOf {
    #[derivative(Debug = "ignore")]
    predicates: Vec<Arc<dyn Exclude>>,
}

impl AnyOf {
    pub fn new(predicates: Vec<Arc<dyn Exclude>>) -> Self {
        AnyOf { predicates }
    }
}

impl Exclude for AnyOf {
    fn is_excluded(&self, path: &Path) -> bool {
        self.predicates.iter().any(|p| p.is_excluded(path))
    }
}
