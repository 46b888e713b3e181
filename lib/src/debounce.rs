use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Collapses repeated signals for the same path
///
/// Signal is accepted if there was no accepted signal for the same path
/// during last `window`. Rejected signals don't extend the window.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    last_accepted: HashMap<PathBuf, Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Debouncer {
            window,
            last_accepted: HashMap::new(),
        }
    }

    /// Returns `true` if signal for `path` received at `now` should be passed on
    pub fn accept(&mut self, path: &Path, now: Instant) -> bool {
        if let Some(last) = self.last_accepted.get(path) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_accepted.insert(path.to_path_buf(), now);
        true
    }

    /// Drops stored state of `path`
    pub fn forget(&mut self, path: &Path) {
        self.last_accepted.remove(path);
    }
}
