use thiserror::Error;

use crate::observer::ObserverId;

/// Errors surfaced by watch sessions, reconciliation and persistence.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The notification backend failed to schedule a watch or deliver from it.
    #[error("watch source error: {0}")]
    Source(#[from] notify::Error),

    /// A raw signal arrived without the fields its kind requires.
    #[error("malformed signal: {0}")]
    MalformedSignal(String),

    /// start() was called while a session was already active.
    #[error("watch session already active")]
    AlreadyWatching,

    /// An observer reported a delivery failure.
    #[error("observer error: {0}")]
    Observer(String),

    /// Deregistration named an id that is not in the registry.
    #[error("observer {0} not found")]
    ObserverNotFound(ObserverId),

    /// One or more observers failed during fan-out. Delivery was still
    /// attempted for every registered observer, and the event stands in
    /// the history.
    #[error("fan-out failed for {} observer(s): {}", failures.len(), failures.join("; "))]
    FanOut { failures: Vec<String> },

    /// Event store failure.
    #[error("event store error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Report or other filesystem I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WatchError>;
