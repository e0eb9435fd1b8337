use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};

use crate::error::{Result, WatchError};
use crate::events::FileEvent;

/// A consumer of reconciled events.
///
/// `notify` runs synchronously on the watch thread for every event that
/// survives filtering and suppression, in registration order. Implementations
/// must return promptly and must not call back into the handler that is
/// delivering the event.
pub trait EventObserver: Send {
    fn notify(&self, event: &FileEvent) -> Result<()>;
}

/// Handle identifying one registration; required to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub(crate) u64);

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl<T: EventObserver + ?Sized + Send + Sync> EventObserver for Arc<T> {
    fn notify(&self, event: &FileEvent) -> Result<()> {
        (**self).notify(event)
    }
}

/// Forwards each event into a channel, for consumers that poll on their own
/// thread (the TUI and the line-output modes).
pub struct ChannelObserver {
    tx: Sender<FileEvent>,
}

impl ChannelObserver {
    pub fn new(tx: Sender<FileEvent>) -> Self {
        Self { tx }
    }
}

impl EventObserver for ChannelObserver {
    fn notify(&self, event: &FileEvent) -> Result<()> {
        self.tx
            .send(event.clone())
            .map_err(|_| WatchError::Observer("event channel receiver dropped".into()))
    }
}

/// Captures every delivered event into a shared buffer.
#[derive(Default)]
pub struct CollectingObserver {
    events: Arc<Mutex<Vec<FileEvent>>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to the capture buffer; clones see the same events.
    pub fn events(&self) -> Arc<Mutex<Vec<FileEvent>>> {
        Arc::clone(&self.events)
    }
}

impl EventObserver for CollectingObserver {
    fn notify(&self, event: &FileEvent) -> Result<()> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
