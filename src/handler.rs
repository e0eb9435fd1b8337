//! The reconciliation core: turns the raw, noisy signal stream from a source
//! backend into a clean, ordered history of file events.
//!
//! Raw notification APIs emit several low-level signals per user action: a
//! file creation arrives as `created` plus a `modified` for the parent
//! directory, and deletions and moves trail the same directory noise. The
//! handler filters signals by extension, classifies the survivors one at a
//! time, and applies two adjacency rules inside a 500ms window so the history
//! keeps one entry per logical change.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::error::{Result, WatchError};
use crate::events::{FileEvent, FileEventKind};
use crate::filter::ExtensionFilter;
use crate::observer::{EventObserver, ObserverId};
use crate::source::{RawEvent, RawEventKind};

/// Adjacent signals closer together than this are treated as one OS-level
/// cascade where the suppression rules apply.
pub const SUPPRESSION_WINDOW_MS: i64 = 500;

/// Counters describing what the handler did with the signals it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HandlerStats {
    /// Events appended to the history.
    pub reconciled: u64,
    /// Modified signals discarded as cascade noise.
    pub suppressed: u64,
    /// Directory-modified entries retracted in favor of a creation.
    pub retracted: u64,
    /// Signals dropped by the extension filter.
    pub filtered: u64,
}

struct HandlerState {
    filter: ExtensionFilter,
    history: Vec<FileEvent>,
    observers: Vec<(ObserverId, Box<dyn EventObserver>)>,
    next_observer_id: u64,
    stats: HandlerStats,
}

/// The event classifier and reconciler.
///
/// One handler owns one event history. A source backend feeds it raw signals
/// from its background thread through [`FileHandler::handle`]; the
/// application thread reads snapshots and manages observers concurrently.
/// All state sits behind a single lock, so reads never observe a
/// half-applied update and registry changes never race with fan-out.
pub struct FileHandler {
    state: Mutex<HandlerState>,
}

impl Default for FileHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl FileHandler {
    pub fn new() -> Self {
        Self::with_filter(ExtensionFilter::all())
    }

    pub fn with_filter(filter: ExtensionFilter) -> Self {
        Self {
            state: Mutex::new(HandlerState {
                filter,
                history: Vec::new(),
                observers: Vec::new(),
                next_observer_id: 0,
                stats: HandlerStats::default(),
            }),
        }
    }

    /// Begin a fresh session: install the filter, clear the history and reset
    /// the counters. Registered observers survive; they belong to the
    /// consumers, not to any one session.
    pub(crate) fn begin_session(&self, filter: ExtensionFilter) {
        let mut state = self.state.lock().unwrap();
        state.filter = filter;
        state.history.clear();
        state.stats = HandlerStats::default();
    }

    /// Reconcile one raw signal at the current wall-clock time.
    ///
    /// Returns the appended event, or `None` when the signal was dropped by
    /// the extension filter or a suppression rule. On a fan-out failure the
    /// event still stands in the history; the error reports which observers
    /// failed after all of them were attempted.
    pub fn handle(&self, raw: RawEvent) -> Result<Option<FileEvent>> {
        self.handle_at(raw, Utc::now())
    }

    /// Reconcile one raw signal as of an explicit timestamp.
    ///
    /// This is the full entry point; [`FileHandler::handle`] stamps the
    /// current time. Taking the timestamp as an argument lets recorded signal
    /// streams be replayed with their original timing.
    pub fn handle_at(&self, raw: RawEvent, now: DateTime<Utc>) -> Result<Option<FileEvent>> {
        if raw.path.as_os_str().is_empty() {
            return Err(WatchError::MalformedSignal(format!(
                "{} signal with an empty path",
                raw.kind
            )));
        }
        if raw.kind == RawEventKind::Moved && raw.dest.is_none() {
            return Err(WatchError::MalformedSignal(format!(
                "moved signal for {} without a destination",
                raw.path.display()
            )));
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        if !state.filter.matches(&raw.path) {
            state.stats.filtered += 1;
            debug!("Dropped {} signal outside filter: {}", raw.kind, raw.path.display());
            return Ok(None);
        }
        if raw.synthetic {
            debug!("Signal synthesized by backend rescan: {}", raw.path.display());
        }

        let candidate = FileEvent {
            kind: classify(raw.kind),
            path: raw.path,
            destination: raw.dest,
            is_dir: raw.is_dir,
            timestamp: now,
        };

        match candidate.kind {
            FileEventKind::Modified => {
                if let Some(last) = state.history.last() {
                    let cascade_kind = matches!(
                        last.kind,
                        FileEventKind::Created | FileEventKind::Deleted | FileEventKind::Moved
                    );
                    if cascade_kind && within_window(last.timestamp, now) {
                        state.stats.suppressed += 1;
                        debug!(
                            "Suppressed modified cascade after {}: {}",
                            last.kind,
                            candidate.path.display()
                        );
                        return Ok(None);
                    }
                }
            }
            FileEventKind::Created => {
                let retract = state.history.last().map_or(false, |last| {
                    last.kind == FileEventKind::Modified
                        && last.is_dir
                        && within_window(last.timestamp, now)
                });
                if retract {
                    let removed = state.history.pop();
                    state.stats.retracted += 1;
                    if let Some(removed) = removed {
                        debug!(
                            "Retracted directory modified entry for {} in favor of created {}",
                            removed.path.display(),
                            candidate.path.display()
                        );
                    }
                }
            }
            _ => {}
        }

        state.history.push(candidate.clone());
        state.stats.reconciled += 1;

        let mut failures = Vec::new();
        for (id, observer) in &state.observers {
            if let Err(err) = observer.notify(&candidate) {
                warn!("Observer {} failed during fan-out: {}", id, err);
                failures.push(format!("observer {id}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(Some(candidate))
        } else {
            Err(WatchError::FanOut { failures })
        }
    }

    /// Snapshot of the full history, oldest first.
    pub fn history(&self) -> Vec<FileEvent> {
        self.state.lock().unwrap().history.clone()
    }

    /// The most recently appended event, if any.
    pub fn current_event(&self) -> Option<FileEvent> {
        self.state.lock().unwrap().history.last().cloned()
    }

    pub fn event_count(&self) -> usize {
        self.state.lock().unwrap().history.len()
    }

    pub fn stats(&self) -> HandlerStats {
        self.state.lock().unwrap().stats
    }

    /// Subscribe an observer to every event this handler reconciles from now
    /// on. Subscriptions are independent: registering two observers over the
    /// same underlying resource delivers to each.
    pub fn register_observer<O>(&self, observer: O) -> ObserverId
    where
        O: EventObserver + 'static,
    {
        let mut state = self.state.lock().unwrap();
        let id = ObserverId(state.next_observer_id);
        state.next_observer_id += 1;
        state.observers.push((id, Box::new(observer)));
        debug!("Registered observer {}", id);
        id
    }

    /// Remove a subscription. Unknown ids report
    /// [`WatchError::ObserverNotFound`] so callers can detect logic errors.
    pub fn deregister_observer(&self, id: ObserverId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.observers.iter().position(|(known, _)| *known == id) {
            Some(index) => {
                state.observers.remove(index);
                debug!("Deregistered observer {}", id);
                Ok(())
            }
            None => Err(WatchError::ObserverNotFound(id)),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.state.lock().unwrap().observers.len()
    }
}

fn classify(kind: RawEventKind) -> FileEventKind {
    match kind {
        RawEventKind::Created => FileEventKind::Created,
        RawEventKind::Deleted => FileEventKind::Deleted,
        RawEventKind::Modified => FileEventKind::Modified,
        RawEventKind::Moved => FileEventKind::Moved,
        RawEventKind::Opened => FileEventKind::Opened,
        RawEventKind::ClosedNoWrite => FileEventKind::ClosedNoWrite,
        RawEventKind::Closed => FileEventKind::Closed,
    }
}

fn within_window(earlier: DateTime<Utc>, later: DateTime<Utc>) -> bool {
    later.signed_duration_since(earlier) < Duration::milliseconds(SUPPRESSION_WINDOW_MS)
}
