use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use derivative::Derivative;

use crate::config::WatchConfig;
use crate::debounce::Debouncer;
use crate::emitter::{Emitter, ListenerId};
use crate::entry::{Entry, EntryKind};
use crate::exclude::{AnyOf, Exclude, Exclusions};
use crate::lister::{list_dir, stat_entry, stat_root};
use crate::registry::{Signal, WatchRegistry};
use crate::tracker::{Change, ChangeTracker};
#[cfg(any(target_os = "linux", target_os = "macos", windows))]
use crate::watcher::{new_watcher, RecommendedWatcher};
use crate::watcher::{SignalKind, Watcher, WatcherError};
use crate::WatchError;

/// How many times directory is listed when its children keep vanishing
const LIST_ATTEMPTS: usize = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    FileCreate,
    FileChange,
    FileDelete,
    DirCreate,
    DirDelete,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::FileCreate => "file:create",
            EventKind::FileChange => "file:change",
            EventKind::FileDelete => "file:delete",
            EventKind::DirCreate => "dir:create",
            EventKind::DirDelete => "dir:delete",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TreeEvent {
    FileCreate(Entry),
    FileChange(Entry),
    FileDelete(Entry),
    DirCreate(Entry),
    DirDelete(Entry),
}

impl TreeEvent {
    fn created(entry: Entry) -> Self {
        match entry.kind() {
            EntryKind::File => TreeEvent::FileCreate(entry),
            EntryKind::Dir => TreeEvent::DirCreate(entry),
        }
    }

    fn deleted(entry: Entry) -> Self {
        match entry.kind() {
            EntryKind::File => TreeEvent::FileDelete(entry),
            EntryKind::Dir => TreeEvent::DirDelete(entry),
        }
    }

    pub fn kind(&self) -> EventKind {
        match self {
            TreeEvent::FileCreate(_) => EventKind::FileCreate,
            TreeEvent::FileChange(_) => EventKind::FileChange,
            TreeEvent::FileDelete(_) => EventKind::FileDelete,
            TreeEvent::DirCreate(_) => EventKind::DirCreate,
            TreeEvent::DirDelete(_) => EventKind::DirDelete,
        }
    }

    pub fn entry(&self) -> &Entry {
        match self {
            TreeEvent::FileCreate(entry)
            | TreeEvent::FileChange(entry)
            | TreeEvent::FileDelete(entry)
            | TreeEvent::DirCreate(entry)
            | TreeEvent::DirDelete(entry) => entry,
        }
    }

    pub fn into_entry(self) -> Entry {
        match self {
            TreeEvent::FileCreate(entry)
            | TreeEvent::FileChange(entry)
            | TreeEvent::FileDelete(entry)
            | TreeEvent::DirCreate(entry)
            | TreeEvent::DirDelete(entry) => entry,
        }
    }
}

impl Display for TreeEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind(), self.entry())
    }
}

/// Lists `dir` again if some child vanished before it was stated
fn list_settled(dir: &Path, exclude: &dyn Exclude) -> Result<Vec<Entry>, WatchError> {
    let mut attempt = 1;
    loop {
        match list_dir(dir, exclude) {
            Err(WatchError::Vanished(child)) if child != dir && attempt < LIST_ATTEMPTS => {
                log::debug!("{} vanished while listing", child.display());
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// Events and errors collected while state is locked
#[derive(Debug, Default)]
struct Outcome {
    events: Vec<TreeEvent>,
    errors: Vec<WatchError>,
}

impl Outcome {
    fn fail(&mut self, error: WatchError) {
        if error.is_vanished() {
            log::debug!("Skipped: {}", error);
        } else {
            log::warn!("{}", error);
            self.errors.push(error);
        }
    }
}

type Relist = Box<dyn FnMut() -> Result<Vec<Entry>, WatchError> + Send>;

struct State<W> {
    registry: WatchRegistry<W>,
    trackers: HashMap<PathBuf, ChangeTracker<Relist>>,
    debouncer: Debouncer,
    exclude: Arc<dyn Exclude>,
}

impl<W: Watcher> State<W> {
    fn attach(&mut self, entry: &Entry) -> Result<(), WatchError> {
        match self.registry.attach(entry) {
            Ok(_) => Ok(()),
            Err(WatcherError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WatchError::Vanished(entry.path().to_path_buf()))
            }
            Err(source) => Err(WatchError::Watch {
                path: entry.path().to_path_buf(),
                source,
            }),
        }
    }

    fn detach(&mut self, path: &Path, outcome: &mut Outcome) {
        if let Err(source) = self.registry.detach(path) {
            outcome.fail(WatchError::Release {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    /// Watches directory and starts tracking its children
    fn watch_dir(&mut self, dir: &Entry) -> Result<Vec<Entry>, WatchError> {
        // attached before listing so changes made during listing trigger another poll
        self.attach(dir)?;

        let children = match list_settled(dir.path(), self.exclude.as_ref()) {
            Ok(children) => children,
            Err(e) => {
                if let Err(release) = self.registry.detach(dir.path()) {
                    log::warn!("Failed to release {}: {}", dir.path().display(), release);
                }
                return Err(e);
            }
        };

        let exclude = Arc::clone(&self.exclude);
        let path = dir.path().to_path_buf();
        let relist: Relist = Box::new(move || list_settled(&path, exclude.as_ref()));
        self.trackers.insert(
            dir.path().to_path_buf(),
            ChangeTracker::new(relist, children.clone()),
        );

        Ok(children)
    }

    /// Watches `entry` and everything below it
    ///
    /// Entries found below `entry` are reported as created, `entry` itself is not.
    fn discover(&mut self, entry: Entry, active: &AtomicBool, outcome: &mut Outcome) {
        let mut queue = vec![entry];
        while let Some(entry) = queue.pop() {
            if !active.load(Ordering::SeqCst) {
                return;
            }
            match entry.kind() {
                EntryKind::File => {
                    if let Err(e) = self.attach(&entry) {
                        outcome.fail(e);
                    }
                }
                EntryKind::Dir => match self.watch_dir(&entry) {
                    Ok(children) => {
                        for child in children {
                            outcome.events.push(TreeEvent::created(child.clone()));
                            queue.push(child);
                        }
                    }
                    Err(e) => outcome.fail(e),
                },
            }
        }
    }

    /// Releases watches of `entry` and of everything discovered below it
    fn remove(&mut self, entry: &Entry, outcome: &mut Outcome) {
        let mut queue = vec![entry.clone()];
        while let Some(entry) = queue.pop() {
            self.debouncer.forget(entry.path());
            self.detach(entry.path(), outcome);
            if let Some(tracker) = self.trackers.remove(entry.path()) {
                queue.extend(tracker.into_snapshot());
            }
        }
    }

    /// Polls tracker of `dir` and reacts to every change it reports
    fn rescan(&mut self, dir: &Path, active: &AtomicBool, outcome: &mut Outcome) {
        let Some(tracker) = self.trackers.get_mut(dir) else {
            return;
        };
        let changes = match tracker.poll() {
            Ok(changes) => changes,
            Err(e) => {
                outcome.fail(e);
                return;
            }
        };
        log::debug!("Polled {}: {} changes", dir.display(), changes.len());

        // entry that changed its kind must be torn down before it is discovered again
        let (deleted, rest): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .partition(|c| matches!(c, Change::Deleted(_)));

        for change in deleted.into_iter().chain(rest) {
            match change {
                Change::Deleted(entry) => {
                    self.remove(&entry, outcome);
                    outcome.events.push(TreeEvent::deleted(entry));
                }
                Change::Created(entry) => {
                    outcome.events.push(TreeEvent::created(entry.clone()));
                    self.discover(entry, active, outcome);
                }
                Change::Updated(entry) if !entry.is_dir() => self.follow(entry, outcome),
                Change::Updated(_) => {}
            }
        }
    }

    /// Moves watch to the new file if path now points to another file
    fn follow(&mut self, file: Entry, outcome: &mut Outcome) {
        if self.registry.is_watched(file.path())
            && self.registry.identity(file.path()) == file.identity()
        {
            return;
        }
        log::debug!("{} was replaced", file.path().display());

        self.detach(file.path(), outcome);
        if let Err(e) = self.attach(&file) {
            outcome.fail(e);
        }
        if self.debouncer.accept(file.path(), Instant::now()) {
            outcome.events.push(TreeEvent::FileChange(file));
        }
    }

    fn file_changed(&mut self, path: &Path, outcome: &mut Outcome) {
        if !self.debouncer.accept(path, Instant::now()) {
            return;
        }
        match stat_entry(path) {
            Ok(entry) => outcome.events.push(TreeEvent::FileChange(entry)),
            Err(WatchError::NotFound(_)) => {
                // parent watch will report deletion
                log::debug!("{} vanished before change was reported", path.display());
                self.debouncer.forget(path);
            }
            Err(e) => outcome.fail(e),
        }
    }
}

struct Shared<W> {
    state: Mutex<State<W>>,

    /// Cleared by `end`, work that finishes later must not publish anything
    active: AtomicBool,

    events: Emitter<TreeEvent>,
    errors: Emitter<WatchError>,
    tick_rate: Duration,
}

impl<W: Watcher> Shared<W> {
    fn lock(&self) -> MutexGuard<'_, State<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn publish(&self, outcome: Outcome) {
        for event in outcome.events {
            if !self.is_active() {
                return;
            }
            self.events.publish(&event);
        }
        for error in outcome.errors {
            if !self.is_active() {
                return;
            }
            self.errors.publish(&error);
        }
    }

    fn react(&self, signals: Vec<Signal>) {
        let mut outcome = Outcome::default();
        {
            let mut state = self.lock();
            let mut polled = HashSet::new();
            for signal in signals {
                if !self.is_active() {
                    return;
                }
                match (signal.entry_kind, signal.kind) {
                    (EntryKind::Dir, _) => {
                        if polled.insert(signal.path.clone()) {
                            state.rescan(&signal.path, &self.active, &mut outcome);
                        }
                    }
                    (EntryKind::File, SignalKind::Modify) => {
                        state.file_changed(&signal.path, &mut outcome)
                    }
                    (EntryKind::File, SignalKind::Other) => {}
                }
            }
        }
        self.publish(outcome);
    }
}

fn run<W: Watcher>(shared: Arc<Shared<W>>) {
    log::debug!("Worker started");
    while shared.is_active() {
        let signals = shared.lock().registry.read_signals();
        if signals.is_empty() {
            thread::sleep(shared.tick_rate);
        } else {
            shared.react(signals);
        }
    }
    log::debug!("Worker stopped");
}

/// Watches whole directory tree and reports changes of its entries
///
/// Nothing is watched until [`TreeWatcher::init()`] is called. Watches are
/// released by [`TreeWatcher::end()`] or when watcher is dropped.
pub struct TreeWatcher<W: Watcher + 'static> {
    root: PathBuf,
    shared: Arc<Shared<W>>,
    initialized: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<W: Watcher + 'static> std::fmt::Debug for TreeWatcher<W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeWatcher")
            .field("root", &self.root)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(any(target_os = "linux", target_os = "macos", windows))]
impl TreeWatcher<RecommendedWatcher> {
    /// Creates watcher of `root` with recommended backend of current platform
    ///
    /// See [`Exclusions`] for syntax of exclude patterns.
    pub fn create<P, I, S>(root: P, excludes: I) -> Result<Self, WatchError>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        excludes
            .into_iter()
            .fold(TreeWatcherBuilder::new(), |builder, pattern| {
                builder.exclude(pattern.as_ref())
            })
            .build(root)
    }

    pub fn builder() -> TreeWatcherBuilder {
        TreeWatcherBuilder::new()
    }
}

impl<W: Watcher + 'static> TreeWatcher<W> {
    fn new(root: PathBuf, watcher: W, exclude: Arc<dyn Exclude>, config: &WatchConfig) -> Self {
        let state = State {
            registry: WatchRegistry::new(watcher),
            trackers: HashMap::new(),
            debouncer: Debouncer::new(config.debounce),
            exclude,
        };
        TreeWatcher {
            root,
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                active: AtomicBool::new(true),
                events: Emitter::default(),
                errors: Emitter::default(),
                tick_rate: config.tick_rate,
            }),
            initialized: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subscribes to events of single kind
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Entry) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(move |event: &TreeEvent| {
            if event.kind() == kind {
                listener(event.entry());
            }
        })
    }

    pub fn on_event<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&TreeEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(listener)
    }

    /// Subscribes to failures that didn't stop watching (unreadable
    /// subdirectory, failed attach or release of a watch)
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&WatchError) + Send + Sync + 'static,
    {
        self.shared.errors.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id) || self.shared.errors.unsubscribe(id)
    }

    /// Discovers and watches the whole tree, then starts reacting to changes
    ///
    /// Every discovered entry is reported as created before this returns.
    /// Fails if root is missing or can't be watched, failures below the
    /// root are reported to error listeners.
    pub fn init(&self) -> Result<(), WatchError> {
        if !self.is_active() {
            return Err(WatchError::Ended);
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Err(WatchError::AlreadyInitialized);
        }

        let outcome = match self.discover_root() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        if !self.is_active() {
            return Err(WatchError::Ended);
        }
        // signals received meanwhile wait in the backend, so initial
        // creates always go before anything the worker reports
        self.shared.publish(outcome);
        if !self.is_active() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let worker = thread::Builder::new()
            .name("treewatch".to_string())
            .spawn(move || run(shared))
            .map_err(|source| WatchError::Io {
                path: self.root.clone(),
                source,
            })?;
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(worker);
        Ok(())
    }

    fn discover_root(&self) -> Result<Outcome, WatchError> {
        let root = stat_root(&self.root)?;
        let mut outcome = Outcome::default();

        let mut state = self.shared.lock();
        match root.kind() {
            EntryKind::File => state.attach(&root).map_err(|e| self.missing_root(e))?,
            EntryKind::Dir => {
                let children = state.watch_dir(&root).map_err(|e| self.missing_root(e))?;
                for child in children {
                    outcome.events.push(TreeEvent::created(child.clone()));
                    state.discover(child, &self.shared.active, &mut outcome);
                }
            }
        }

        log::info!(
            "Watching {} entries under {}",
            state.registry.len(),
            self.root.display()
        );
        Ok(outcome)
    }

    fn missing_root(&self, error: WatchError) -> WatchError {
        match error {
            WatchError::Vanished(path) if path == self.root => WatchError::NotFound(path),
            e => e,
        }
    }

    /// Stops watching and releases every watch
    ///
    /// Can be called multiple times and from listeners.
    pub fn end(&self) {
        if !self.shared.active.swap(false, Ordering::SeqCst) {
            return;
        }

        let errors = {
            let mut state = self.shared.lock();
            state.trackers.clear();
            state.registry.detach_all()
        };
        for (path, source) in errors {
            let error = WatchError::Release { path, source };
            log::warn!("{}", error);
            self.shared.errors.publish(&error);
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            // listener running on worker thread can't wait for itself
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
        log::info!("Stopped watching {}", self.root.display());
    }

    pub fn is_active(&self) -> bool {
        self.shared.is_active()
    }

    /// Number of active low-level watches
    pub fn watch_count(&self) -> usize {
        self.shared.lock().registry.len()
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let state = self.shared.lock();
        let mut paths: Vec<_> = state
            .registry
            .watched_paths()
            .map(|p| p.to_path_buf())
            .collect();
        paths.sort();
        paths
    }
}

impl<W: Watcher + 'static> Drop for TreeWatcher<W> {
    fn drop(&mut self) {
        self.end();
    }
}

#[derive(Default, Derivative)]
#[derivative(Debug)]
pub struct TreeWatcherBuilder {
    patterns: Vec<String>,
    #[derivative(Debug = "ignore")]
    predicates: Vec<Arc<dyn Exclude>>,
    config: WatchConfig,
}

impl TreeWatcherBuilder {
    pub fn new() -> Self {
        TreeWatcherBuilder::default()
    }

    /// Adds exclude pattern, it is compiled when watcher is built
    pub fn exclude<S: Into<String>>(mut self, pattern: S) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    pub fn exclude_with<E: Exclude + 'static>(mut self, predicate: E) -> Self {
        self.predicates.push(Arc::new(predicate));
        self
    }

    pub fn debounce(mut self, window: Duration) -> Self {
        self.config.debounce = window;
        self
    }

    pub fn tick_rate(mut self, tick_rate: Duration) -> Self {
        self.config.tick_rate = tick_rate;
        self
    }

    pub fn config(mut self, config: WatchConfig) -> Self {
        self.config = config;
        self
    }

    #[cfg(any(target_os = "linux", target_os = "macos", windows))]
    pub fn build<P: AsRef<Path>>(self, root: P) -> Result<TreeWatcher<RecommendedWatcher>, WatchError> {
        let root = absolute(root.as_ref())?;
        let watcher = new_watcher(&root).map_err(|source| WatchError::Watch {
            path: root.clone(),
            source,
        })?;
        self.build_with(root, watcher)
    }

    /// Builds watcher that uses provided backend
    pub fn build_with<P, W>(self, root: P, watcher: W) -> Result<TreeWatcher<W>, WatchError>
    where
        P: AsRef<Path>,
        W: Watcher + 'static,
    {
        let root = absolute(root.as_ref())?;
        let mut predicates = self.predicates;
        let exclusions = Exclusions::new(&self.patterns)?;
        if !exclusions.is_empty() {
            predicates.insert(0, Arc::new(exclusions));
        }

        Ok(TreeWatcher::new(
            root,
            watcher,
            Arc::new(AnyOf::new(predicates)),
            &self.config,
        ))
    }
}

fn absolute(path: &Path) -> Result<PathBuf, WatchError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let current = std::env::current_dir().map_err(|e| WatchError::from_io(path, e))?;
    Ok(current.join(path))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::lister::stat_entry;
    use crate::registry::tests::FakeWatcher;
    use crate::tree_watcher::{EventKind, TreeEvent, TreeWatcher, TreeWatcherBuilder};
    use crate::watcher::SignalKind;
    use crate::WatchError;

    /// root/{a/{a1/, a2/{a21/, a22/}}, b/{b1, b2, b3/, b4/{b41/{b411/}}}}
    fn scenario() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        for path in ["a/a1", "a/a2/a21", "a/a2/a22", "b/b3", "b/b4/b41/b411"] {
            fs::create_dir_all(dir.path().join(path)).unwrap();
        }
        fs::write(dir.path().join("b/b1"), "b1").unwrap();
        fs::write(dir.path().join("b/b2"), "b2").unwrap();
        dir
    }

    struct Harness {
        watcher: TreeWatcher<FakeWatcher>,
        fake: FakeWatcher,
        events: Arc<Mutex<Vec<TreeEvent>>>,
        errors: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(root: &Path, builder: TreeWatcherBuilder) -> Self {
            let fake = FakeWatcher::default();
            let watcher = builder
                .tick_rate(Duration::from_millis(1))
                .build_with(root, fake.clone())
                .unwrap();

            let events = Arc::new(Mutex::new(vec![]));
            let e = Arc::clone(&events);
            watcher.on_event(move |event| e.lock().unwrap().push(event.clone()));
            let errors = Arc::new(Mutex::new(vec![]));
            let e = Arc::clone(&errors);
            watcher.on_error(move |error| e.lock().unwrap().push(error.to_string()));

            Harness {
                watcher,
                fake,
                events,
                errors,
            }
        }

        fn fire(&self, path: &Path, kind: SignalKind) {
            self.fake.state.lock().unwrap().fire(path, kind);
        }

        fn events(&self) -> Vec<TreeEvent> {
            self.events.lock().unwrap().clone()
        }

        fn take_events(&self) -> Vec<TreeEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }

        fn count(&self, kind: EventKind) -> usize {
            self.events().iter().filter(|e| e.kind() == kind).count()
        }

        /// Waits until at least `count` events are received and a bit more
        /// to catch events that should not be there
        fn wait_for(&self, count: usize) -> Vec<TreeEvent> {
            for _ in 0..500 {
                if self.events.lock().unwrap().len() >= count {
                    break;
                }
                thread::sleep(Duration::from_millis(5));
            }
            thread::sleep(Duration::from_millis(50));
            self.take_events()
        }

        fn watched(&self) -> Vec<PathBuf> {
            self.fake.state.lock().unwrap().watched()
        }
    }

    fn summary(events: &[TreeEvent]) -> Vec<(EventKind, PathBuf)> {
        events
            .iter()
            .map(|e| (e.kind(), e.entry().path().to_path_buf()))
            .collect()
    }

    #[test]
    fn discovers_whole_tree() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        assert_eq!(harness.count(EventKind::DirCreate), 10);
        assert_eq!(harness.count(EventKind::FileCreate), 2);
        assert_eq!(harness.fake.state.lock().unwrap().watched_dirs(), 11);
        assert_eq!(harness.watcher.watch_count(), 13);
        assert!(harness.errors.lock().unwrap().is_empty());

        // parent is always reported before its children
        let events = harness.events();
        for (i, event) in events.iter().enumerate() {
            let parent = event.entry().path().parent().unwrap();
            assert!(
                parent == root.path() || events[..i].iter().any(|e| e.entry().path() == parent),
                "{} reported before its parent",
                event
            );
        }
    }

    #[test]
    fn excluded_subtree_is_never_watched() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new().exclude("b"));
        harness.watcher.init().unwrap();

        let b = root.path().join("b");
        assert_eq!(harness.fake.state.lock().unwrap().watched_dirs(), 6);
        assert_eq!(harness.count(EventKind::DirCreate), 5);
        assert!(harness.watched().iter().all(|p| !p.starts_with(&b)));
        assert!(harness
            .events()
            .iter()
            .all(|e| !e.entry().path().starts_with(&b)));

        // new excluded entries are not reported either
        fs::create_dir(root.path().join("a/b")).unwrap();
        fs::create_dir(root.path().join("a/c")).unwrap();
        harness.take_events();
        harness.fire(&root.path().join("a"), SignalKind::Other);
        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::DirCreate, root.path().join("a/c"))]
        );
    }

    #[test]
    fn exclude_predicate() {
        let root = scenario();
        let b4 = root.path().join("b/b4");
        let harness = Harness::new(
            root.path(),
            TreeWatcherBuilder::new().exclude_with(move |path: &Path| path == b4),
        );
        harness.watcher.init().unwrap();

        assert_eq!(harness.fake.state.lock().unwrap().watched_dirs(), 8);
    }

    #[test]
    fn end_releases_every_watch_once() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        harness.watcher.end();
        harness.watcher.end();
        assert!(!harness.watcher.is_active());
        assert_eq!(harness.watcher.watch_count(), 0);

        let state = harness.fake.state.lock().unwrap();
        assert!(state.active.is_empty());
        assert_eq!(state.removed.len(), state.added.len());
        for path in &state.added {
            assert_eq!(state.removed_count(path), 1);
        }
    }

    #[test]
    fn init_is_called_once() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        assert!(matches!(
            harness.watcher.init(),
            Err(WatchError::AlreadyInitialized)
        ));
        harness.watcher.end();
        assert!(matches!(harness.watcher.init(), Err(WatchError::Ended)));
    }

    #[test]
    fn missing_root() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let harness = Harness::new(&missing, TreeWatcherBuilder::new());

        let err = harness.watcher.init().unwrap_err();
        assert!(matches!(err, WatchError::NotFound(p) if p == missing));
        assert!(harness.watched().is_empty());
    }

    #[test]
    fn root_watch_failure_is_fatal() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness
            .fake
            .state
            .lock()
            .unwrap()
            .fail_add
            .push(root.path().to_path_buf());

        let err = harness.watcher.init().unwrap_err();
        assert!(matches!(err, WatchError::Watch { .. }));
        assert!(harness.events().is_empty());

        // failed init can be repeated
        harness.fake.state.lock().unwrap().fail_add.clear();
        harness.watcher.init().unwrap();
        assert_eq!(harness.count(EventKind::DirCreate), 10);
    }

    #[test]
    fn failed_subtree_is_skipped() {
        let root = scenario();
        let a = root.path().join("a");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.fake.state.lock().unwrap().fail_add.push(a.clone());
        harness.watcher.init().unwrap();

        // root, b, b3, b4, b41, b411
        assert_eq!(harness.fake.state.lock().unwrap().watched_dirs(), 6);
        assert!(!harness.watched().contains(&a.join("a1")));
        assert_eq!(harness.count(EventKind::DirCreate), 6);

        let errors = harness.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains(&a.display().to_string()));
    }

    #[test]
    fn release_failure_does_not_stop_shutdown() {
        let root = scenario();
        let a = root.path().join("a");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.fake.state.lock().unwrap().fail_remove.push(a);
        harness.watcher.init().unwrap();

        harness.watcher.end();
        assert_eq!(harness.errors.lock().unwrap().len(), 1);
        assert!(harness.fake.state.lock().unwrap().active.is_empty());
    }

    #[test]
    fn reports_created_entries() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        fs::write(root.path().join("new.txt"), "").unwrap();
        fs::create_dir_all(root.path().join("c/c1")).unwrap();
        harness.fire(root.path(), SignalKind::Other);

        let events = summary(&harness.wait_for(3));
        assert_eq!(events.len(), 3);
        assert!(events.contains(&(EventKind::FileCreate, root.path().join("new.txt"))));
        let c = events
            .iter()
            .position(|e| *e == (EventKind::DirCreate, root.path().join("c")))
            .unwrap();
        let c1 = events
            .iter()
            .position(|e| *e == (EventKind::DirCreate, root.path().join("c/c1")))
            .unwrap();
        assert!(c < c1);

        let state = harness.fake.state.lock().unwrap();
        for path in ["new.txt", "c", "c/c1"] {
            let path = root.path().join(path);
            assert_eq!(state.added.iter().filter(|p| **p == path).count(), 1);
            assert_eq!(state.watched().iter().filter(|p| **p == path).count(), 1);
        }
    }

    #[test]
    fn removes_deleted_subtree() {
        let root = scenario();
        let b = root.path().join("b");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        fs::remove_dir_all(&b).unwrap();
        harness.fire(root.path(), SignalKind::Other);

        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::DirDelete, b.clone())]
        );
        assert!(harness.watched().iter().all(|p| !p.starts_with(&b)));
        let state = harness.fake.state.lock().unwrap();
        assert_eq!(state.removed_count(&b.join("b4/b41/b411")), 1);
        assert_eq!(state.removed_count(&b.join("b1")), 1);
    }

    #[test]
    fn reports_deleted_file() {
        let root = scenario();
        let b1 = root.path().join("b/b1");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        fs::remove_file(&b1).unwrap();
        harness.fire(&root.path().join("b"), SignalKind::Other);

        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::FileDelete, b1.clone())]
        );
        assert!(!harness.watched().contains(&b1));
    }

    #[test]
    fn file_replaced_by_dir() {
        let root = scenario();
        let b1 = root.path().join("b/b1");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        fs::remove_file(&b1).unwrap();
        fs::create_dir(&b1).unwrap();
        harness.fire(&root.path().join("b"), SignalKind::Other);

        assert_eq!(
            summary(&harness.wait_for(2)),
            vec![
                (EventKind::FileDelete, b1.clone()),
                (EventKind::DirCreate, b1.clone()),
            ]
        );
        let state = harness.fake.state.lock().unwrap();
        assert_eq!(state.watched().iter().filter(|p| **p == b1).count(), 1);
        assert_eq!(state.watched_dirs(), 12);
    }

    #[test]
    fn debounces_file_changes() {
        let root = scenario();
        let b1 = root.path().join("b/b1");
        let harness = Harness::new(
            root.path(),
            TreeWatcherBuilder::new().debounce(Duration::from_secs(60)),
        );
        harness.watcher.init().unwrap();
        harness.take_events();

        {
            let mut state = harness.fake.state.lock().unwrap();
            state.fire(&b1, SignalKind::Modify);
            state.fire(&b1, SignalKind::Modify);
            state.fire(&b1, SignalKind::Modify);
        }
        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::FileChange, b1.clone())]
        );

        // window is not restarted by rejected signals but is still running
        harness.fire(&b1, SignalKind::Modify);
        assert!(harness.wait_for(1).is_empty());
    }

    #[test]
    fn zero_window_reports_every_change() {
        let root = scenario();
        let b1 = root.path().join("b/b1");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new().debounce(Duration::ZERO));
        harness.watcher.init().unwrap();
        harness.take_events();

        {
            let mut state = harness.fake.state.lock().unwrap();
            state.fire(&b1, SignalKind::Modify);
            state.fire(&b1, SignalKind::Modify);
        }
        assert_eq!(harness.wait_for(2).len(), 2);
    }

    #[test]
    fn other_file_signals_are_ignored() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        harness.fire(&root.path().join("b/b1"), SignalKind::Other);
        // nothing changed in the directory either
        harness.fire(root.path(), SignalKind::Other);
        assert!(harness.wait_for(1).is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn follows_replaced_file() {
        let root = scenario();
        let b1 = root.path().join("b/b1");
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();
        harness.take_events();

        // make sure new file has another modification time
        thread::sleep(Duration::from_millis(50));
        let tmp = root.path().join("b/b1.tmp");
        fs::write(&tmp, "new content").unwrap();
        fs::rename(&tmp, &b1).unwrap();
        harness.fire(&root.path().join("b"), SignalKind::Other);

        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::FileChange, b1.clone())]
        );
        let state = harness.fake.state.lock().unwrap();
        assert_eq!(state.added.iter().filter(|p| **p == b1).count(), 2);
        assert_eq!(state.removed_count(&b1), 1);
        assert_eq!(state.watched().iter().filter(|p| **p == b1).count(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_root() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(real.join("a/a1")).unwrap();
        fs::write(real.join("a/f"), "").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let harness = Harness::new(&link, TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        let mut events = summary(&harness.events());
        events.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            events,
            vec![
                (EventKind::DirCreate, link.join("a")),
                (EventKind::DirCreate, link.join("a/a1")),
                (EventKind::FileCreate, link.join("a/f")),
            ]
        );
        assert_eq!(harness.fake.state.lock().unwrap().watched_dirs(), 3);
        assert!(harness.watched().contains(&link));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_below_root_are_not_followed() {
        let root = scenario();
        let up = root.path().join("a/up");
        std::os::unix::fs::symlink("..", &up).unwrap();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        assert_eq!(harness.count(EventKind::DirCreate), 10);
        assert_eq!(harness.count(EventKind::FileCreate), 3);
        assert!(harness
            .events()
            .contains(&TreeEvent::FileCreate(stat_entry(&up).unwrap())));
        let state = harness.fake.state.lock().unwrap();
        assert_eq!(state.watched_dirs(), 11);
        assert_eq!(state.added.iter().filter(|p| **p == up).count(), 1);
        assert!(state.added.iter().all(|p| !p.starts_with(&up) || *p == up));
    }

    #[test]
    fn file_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        let harness = Harness::new(&file, TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        assert!(harness.events().is_empty());
        assert_eq!(harness.watched(), vec![file.clone()]);

        harness.fire(&file, SignalKind::Modify);
        assert_eq!(
            summary(&harness.wait_for(1)),
            vec![(EventKind::FileChange, file.clone())]
        );
    }

    #[test]
    fn listener_can_end_watcher() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        harness.watcher.init().unwrap();

        let watcher = Arc::new(harness.watcher);
        let weak = Arc::downgrade(&watcher);
        watcher.on(EventKind::FileCreate, move |_| {
            if let Some(watcher) = weak.upgrade() {
                watcher.end();
            }
        });

        fs::write(root.path().join("stop"), "").unwrap();
        harness
            .fake
            .state
            .lock()
            .unwrap()
            .fire(root.path(), SignalKind::Other);

        for _ in 0..500 {
            if !watcher.is_active() {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!watcher.is_active());
        assert!(harness.fake.state.lock().unwrap().active.is_empty());
    }

    #[test]
    fn unsubscribe() {
        let root = scenario();
        let harness = Harness::new(root.path(), TreeWatcherBuilder::new());
        let dirs = Arc::new(Mutex::new(0));
        let d = Arc::clone(&dirs);
        let id = harness
            .watcher
            .on(EventKind::DirCreate, move |_| *d.lock().unwrap() += 1);
        harness.watcher.init().unwrap();
        assert_eq!(*dirs.lock().unwrap(), 10);

        assert!(harness.watcher.unsubscribe(id));
        fs::create_dir(root.path().join("c")).unwrap();
        harness.fire(root.path(), SignalKind::Other);
        assert_eq!(harness.wait_for(1).len(), 1);
        assert_eq!(*dirs.lock().unwrap(), 10);
    }

    #[test]
    fn event_names() {
        assert_eq!(EventKind::FileCreate.to_string(), "file:create");
        assert_eq!(EventKind::DirDelete.to_string(), "dir:delete");
    }
}
