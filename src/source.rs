//! Raw signal sources.
//!
//! A source watches one directory root and feeds unreconciled signals to a
//! [`FileHandler`](crate::handler::FileHandler) on a dedicated background
//! thread. Backends are interchangeable behind [`EventSource`]: the
//! platform-native notification API for low latency, or interval snapshot
//! scanning when uniform cross-platform behavior matters more than either.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error};
use walkdir::WalkDir;

use crate::error::Result;
use crate::handler::FileHandler;

/// How long an unmatched rename half may wait for its partner before it is
/// reported as a departure from the watched scope.
const RENAME_PAIRING_TIMEOUT: Duration = Duration::from_millis(100);

/// Kind of an unreconciled signal, as reported by the OS layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    Created,
    Deleted,
    Modified,
    Moved,
    Opened,
    ClosedNoWrite,
    Closed,
}

impl fmt::Display for RawEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RawEventKind::Created => "created",
            RawEventKind::Deleted => "deleted",
            RawEventKind::Modified => "modified",
            RawEventKind::Moved => "moved",
            RawEventKind::Opened => "opened",
            RawEventKind::ClosedNoWrite => "closed_no_write",
            RawEventKind::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One unreconciled notification from a source backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub kind: RawEventKind,
    pub path: PathBuf,
    /// New location, for rename signals whose both halves are known.
    pub dest: Option<PathBuf>,
    pub is_dir: bool,
    /// Set when the backend synthesized the signal during a rescan rather
    /// than observing the change directly.
    pub synthetic: bool,
}

impl RawEvent {
    fn plain(kind: RawEventKind, path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind,
            path: path.into(),
            dest: None,
            is_dir,
            synthetic: false,
        }
    }

    pub fn created(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::plain(RawEventKind::Created, path, is_dir)
    }

    pub fn deleted(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::plain(RawEventKind::Deleted, path, is_dir)
    }

    pub fn modified(path: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self::plain(RawEventKind::Modified, path, is_dir)
    }

    pub fn moved(from: impl Into<PathBuf>, to: impl Into<PathBuf>, is_dir: bool) -> Self {
        Self {
            kind: RawEventKind::Moved,
            path: from.into(),
            dest: Some(to.into()),
            is_dir,
            synthetic: false,
        }
    }

    pub fn opened(path: impl Into<PathBuf>) -> Self {
        Self::plain(RawEventKind::Opened, path, false)
    }

    pub fn closed_no_write(path: impl Into<PathBuf>) -> Self {
        Self::plain(RawEventKind::ClosedNoWrite, path, false)
    }

    pub fn closed(path: impl Into<PathBuf>) -> Self {
        Self::plain(RawEventKind::Closed, path, false)
    }

    pub fn with_synthetic(mut self, synthetic: bool) -> Self {
        self.synthetic = synthetic;
        self
    }
}

/// Which notification backend drives a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceBackend {
    /// Platform-recommended native notification API.
    Native,
    /// Interval snapshot scanning. Higher latency and more I/O, but behaves
    /// the same on every platform.
    Polling { interval: Duration },
}

/// A scheduled watch over one directory root.
///
/// `start` begins signal delivery and returns promptly; `stop` ceases
/// delivery, releases the OS watch and blocks until the background delivery
/// loop has exited, so a later session cannot race with lingering signals.
pub trait EventSource: Send {
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
}

/// Source implementation over the platform-recommended `notify` backend.
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    worker: Option<JoinHandle<()>>,
    root: PathBuf,
    mode: RecursiveMode,
}

impl NotifySource {
    /// Bind a native watcher to `handler` for `directory`, without starting
    /// delivery. The classification thread is spawned here and drains until
    /// the backend is torn down.
    pub fn schedule(
        handler: Arc<FileHandler>,
        directory: impl AsRef<Path>,
        recursive: bool,
    ) -> Result<Self> {
        let root = directory.as_ref().to_path_buf();
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let watcher = RecommendedWatcher::new(tx, Config::default())?;
        let worker = thread::spawn(move || run_delivery_loop(rx, handler));

        debug!("Scheduled native source for {}", root.display());
        Ok(Self {
            watcher: Some(watcher),
            worker: Some(worker),
            root,
            mode: if recursive {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            },
        })
    }

    fn teardown(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            if let Err(err) = watcher.unwatch(&self.root) {
                debug!("Unwatch on teardown: {}", err);
            }
        }
        // The backend is gone, so its channel sender is gone and the
        // delivery loop drains whatever already arrived, then exits.
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Signal delivery thread panicked");
            }
        }
    }
}

impl EventSource for NotifySource {
    fn start(&mut self) -> Result<()> {
        match self.watcher.as_mut() {
            Some(watcher) => {
                watcher.watch(&self.root, self.mode)?;
                Ok(())
            }
            None => Err(notify::Error::generic("source already torn down").into()),
        }
    }

    fn stop(&mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }
}

impl Drop for NotifySource {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Interval snapshot scanner.
///
/// Walks the root on a fixed cadence, stamps every entry, and diffs each
/// pass against the previous one. The pass taken at `start` is the baseline;
/// only changes after it become signals. A vanished path whose file id
/// resurfaces elsewhere in the same pass reads as a single move, which the
/// native backend gets from the OS and a scanner has to reconstruct.
pub struct ScanSource {
    handler: Option<Arc<FileHandler>>,
    shutdown: Option<mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
    root: PathBuf,
    recursive: bool,
    interval: Duration,
}

impl ScanSource {
    pub fn schedule(
        handler: Arc<FileHandler>,
        directory: impl AsRef<Path>,
        recursive: bool,
        interval: Duration,
    ) -> Self {
        let root = directory.as_ref().to_path_buf();
        debug!("Scheduled scan source for {}", root.display());
        Self {
            handler: Some(handler),
            shutdown: None,
            worker: None,
            root,
            recursive,
            interval,
        }
    }

    fn teardown(&mut self) {
        // Dropping the sender wakes the scan loop, which exits after the
        // pass in flight.
        self.shutdown.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Snapshot scan thread panicked");
            }
        }
    }
}

impl EventSource for ScanSource {
    fn start(&mut self) -> Result<()> {
        // A missing root has to fail the session here; an empty scan would
        // just report silence.
        fs::metadata(&self.root)?;
        let handler = match self.handler.take() {
            Some(handler) => handler,
            None => return Err(notify::Error::generic("source already torn down").into()),
        };

        let (tx, rx) = mpsc::channel();
        let root = self.root.clone();
        let recursive = self.recursive;
        let interval = self.interval;
        self.worker = Some(thread::spawn(move || {
            run_scan_loop(rx, handler, root, recursive, interval)
        }));
        self.shutdown = Some(tx);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.teardown();
        Ok(())
    }
}

impl Drop for ScanSource {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_scan_loop(
    shutdown: Receiver<()>,
    handler: Arc<FileHandler>,
    root: PathBuf,
    recursive: bool,
    interval: Duration,
) {
    let mut snapshot = take_snapshot(&root, recursive);
    loop {
        match shutdown.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
        let next = take_snapshot(&root, recursive);
        for raw in diff_snapshots(&snapshot, &next) {
            deliver(&handler, raw);
        }
        snapshot = next;
    }
}

/// What one scan pass remembers about an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PathStamp {
    file_id: Option<u64>,
    modified: Option<SystemTime>,
    is_dir: bool,
}

impl PathStamp {
    fn of(metadata: &fs::Metadata) -> Self {
        Self {
            file_id: file_id(metadata),
            modified: metadata.modified().ok(),
            is_dir: metadata.is_dir(),
        }
    }
}

#[cfg(unix)]
fn file_id(metadata: &fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

/// Without a stable file id, renames degrade to departure plus arrival.
#[cfg(not(unix))]
fn file_id(_metadata: &fs::Metadata) -> Option<u64> {
    None
}

fn take_snapshot(root: &Path, recursive: bool) -> BTreeMap<PathBuf, PathStamp> {
    let mut walker = WalkDir::new(root).follow_links(false);
    if !recursive {
        walker = walker.max_depth(1);
    }

    let mut entries = BTreeMap::new();
    for entry in walker.into_iter().filter_map(|entry| entry.ok()) {
        match entry.metadata() {
            Ok(metadata) => {
                entries.insert(entry.into_path(), PathStamp::of(&metadata));
            }
            Err(err) => debug!("Skipping unreadable entry: {}", err),
        }
    }
    entries
}

/// Diff two scan passes into raw signals.
///
/// Departures come first, then arrivals and paired moves, then timestamp
/// changes. A structural change also bumps the parent directory's mtime;
/// emitting that noise last means reconciliation sees it right after the
/// change that caused it.
fn diff_snapshots(
    old: &BTreeMap<PathBuf, PathStamp>,
    new: &BTreeMap<PathBuf, PathStamp>,
) -> Vec<RawEvent> {
    // An entry survives only while the same file id sits at its path.
    let mut vanished: Vec<(&PathBuf, &PathStamp)> = old
        .iter()
        .filter(|(path, previous)| {
            new.get(*path)
                .map_or(true, |current| current.file_id != previous.file_id)
        })
        .collect();

    let mut arrivals = Vec::new();
    let mut touched = Vec::new();
    for (path, current) in new {
        match old.get(path) {
            Some(previous) if previous.file_id == current.file_id => {
                if previous.modified != current.modified {
                    touched.push(RawEvent::modified(path.clone(), current.is_dir));
                }
            }
            _ => {
                let partner = current.file_id.and_then(|id| {
                    vanished
                        .iter()
                        .position(|(_, gone)| gone.file_id == Some(id))
                });
                match partner {
                    Some(index) => {
                        let (from, _) = vanished.remove(index);
                        arrivals.push(RawEvent::moved(from.clone(), path.clone(), current.is_dir));
                    }
                    None => arrivals.push(RawEvent::created(path.clone(), current.is_dir)),
                }
            }
        }
    }

    let mut events: Vec<RawEvent> = vanished
        .into_iter()
        .map(|(path, gone)| RawEvent::deleted(path.clone(), gone.is_dir))
        .collect();
    events.extend(arrivals);
    events.extend(touched);
    events
}

fn run_delivery_loop(rx: Receiver<notify::Result<Event>>, handler: Arc<FileHandler>) {
    let mut mapper = SignalMapper::default();
    loop {
        match rx.recv_timeout(RENAME_PAIRING_TIMEOUT) {
            Ok(Ok(event)) => {
                for raw in mapper.map(event) {
                    deliver(&handler, raw);
                }
            }
            Ok(Err(err)) => {
                // Fatal to the session: the caller must stop and restart.
                error!("Watch backend error: {}", err);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if let Some(raw) = mapper.flush() {
                    deliver(&handler, raw);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if let Some(raw) = mapper.flush() {
                    deliver(&handler, raw);
                }
                break;
            }
        }
    }
}

fn deliver(handler: &FileHandler, raw: RawEvent) {
    if let Err(err) = handler.handle(raw) {
        error!("Failed to reconcile signal: {}", err);
    }
}

/// Half of a rename whose partner has not arrived yet.
struct PendingRename {
    tracker: Option<usize>,
    path: PathBuf,
    synthetic: bool,
}

/// Translates backend notifications into raw signals.
///
/// Inotify reports a rename as an eager `Name(From)` followed by a paired
/// `Name(Both)` carrying the same tracker, so the `From` half is held back
/// here. It becomes a plain deletion only when no partner shows up, which is
/// what a move out of the watched scope actually is.
#[derive(Default)]
pub(crate) struct SignalMapper {
    pending: Option<PendingRename>,
}

impl SignalMapper {
    pub(crate) fn map(&mut self, event: Event) -> Vec<RawEvent> {
        if let EventKind::Modify(ModifyKind::Name(mode)) = event.kind {
            return self.map_rename(mode, &event);
        }

        let mut out = Vec::new();
        out.extend(self.flush());
        let synthetic = event.need_rescan();
        out.extend(
            map_plain(&event)
                .into_iter()
                .map(|raw| raw.with_synthetic(synthetic)),
        );
        out
    }

    fn map_rename(&mut self, mode: RenameMode, event: &Event) -> Vec<RawEvent> {
        let synthetic = event.need_rescan();
        let mut out = Vec::new();
        match mode {
            RenameMode::From if !event.paths.is_empty() => {
                out.extend(self.flush());
                self.pending = Some(PendingRename {
                    tracker: event.tracker(),
                    path: event.paths[0].clone(),
                    synthetic,
                });
            }
            RenameMode::Both if event.paths.len() >= 2 => {
                let from = event.paths[0].clone();
                let to = event.paths[1].clone();
                let pairs_with_pending = self.pending.as_ref().map_or(false, |pending| {
                    (pending.tracker.is_some() && pending.tracker == event.tracker())
                        || pending.path == from
                });
                if pairs_with_pending {
                    self.pending = None;
                } else {
                    out.extend(self.flush());
                }
                let is_dir = to.is_dir();
                out.push(RawEvent::moved(from, to, is_dir).with_synthetic(synthetic));
            }
            // A lone arrival half is a move into the watched scope.
            RenameMode::To if !event.paths.is_empty() => {
                out.extend(self.flush());
                let path = event.paths[0].clone();
                let is_dir = path.is_dir();
                out.push(RawEvent::created(path, is_dir).with_synthetic(synthetic));
            }
            _ => {
                out.extend(self.flush());
                if event.paths.len() >= 2 {
                    let from = event.paths[0].clone();
                    let to = event.paths[1].clone();
                    let is_dir = to.is_dir();
                    out.push(RawEvent::moved(from, to, is_dir).with_synthetic(synthetic));
                } else {
                    out.extend(event.paths.iter().map(|path| {
                        RawEvent::modified(path.clone(), path.is_dir()).with_synthetic(synthetic)
                    }));
                }
            }
        }
        out
    }

    /// Give up on the held rename half. The departed path is gone from the
    /// watched scope, so it reads as a deletion.
    pub(crate) fn flush(&mut self) -> Option<RawEvent> {
        self.pending
            .take()
            .map(|pending| RawEvent::deleted(pending.path, false).with_synthetic(pending.synthetic))
    }
}

/// Stateless translation for everything except rename signals.
fn map_plain(event: &Event) -> Vec<RawEvent> {
    match event.kind {
        EventKind::Create(kind) => event
            .paths
            .iter()
            .map(|path| {
                let is_dir = kind == CreateKind::Folder || path.is_dir();
                RawEvent::created(path.clone(), is_dir)
            })
            .collect(),
        EventKind::Remove(kind) => event
            .paths
            .iter()
            .map(|path| RawEvent::deleted(path.clone(), kind == RemoveKind::Folder))
            .collect(),
        EventKind::Modify(_) => event
            .paths
            .iter()
            .map(|path| RawEvent::modified(path.clone(), path.is_dir()))
            .collect(),
        EventKind::Access(AccessKind::Open(_)) => event
            .paths
            .iter()
            .map(|path| RawEvent::opened(path.clone()))
            .collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => event
            .paths
            .iter()
            .map(|path| RawEvent::closed(path.clone()))
            .collect(),
        EventKind::Access(AccessKind::Close(_)) => event
            .paths
            .iter()
            .map(|path| RawEvent::closed_no_write(path.clone()))
            .collect(),
        EventKind::Access(_) => Vec::new(),
        EventKind::Any | EventKind::Other => {
            debug!("Ignoring unclassified backend event: {:?}", event.kind);
            Vec::new()
        }
    }
}
