use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, WatchError};
use crate::filter::ExtensionFilter;
use crate::handler::FileHandler;
use crate::source::{EventSource, NotifySource, ScanSource, SourceBackend};

/// Manages one watch at a time: binds the reconciling handler to a live
/// source backend for a directory root, and tears the binding down again.
///
/// The state machine is idle -> active (on [`FileWatcher::start`]) -> idle
/// (on [`FileWatcher::stop`]); there are no other states. Each start opens a
/// fresh history on the handler; observers registered on the handler carry
/// across sessions.
pub struct FileWatcher {
    handler: Arc<FileHandler>,
    backend: SourceBackend,
    source: Option<Box<dyn EventSource>>,
    root: Option<PathBuf>,
}

impl FileWatcher {
    pub fn new(handler: Arc<FileHandler>, backend: SourceBackend) -> Self {
        Self {
            handler,
            backend,
            source: None,
            root: None,
        }
    }

    /// The handler whose history this watcher feeds.
    pub fn handler(&self) -> &Arc<FileHandler> {
        &self.handler
    }

    pub fn is_watching(&self) -> bool {
        self.source.is_some()
    }

    /// Root of the active session, `None` while idle.
    pub fn watched_root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Start watching `directory`.
    ///
    /// `extensions` is a list of dot-prefixed suffixes such as `".txt"`; an
    /// empty list watches every extension. The directory must exist and be
    /// readable, which the backend checks before delivery begins; on failure
    /// the session stays idle and the previous history is untouched. Returns
    /// [`WatchError::AlreadyWatching`] when a session is active.
    pub fn start<I, S>(
        &mut self,
        directory: impl AsRef<Path>,
        recursive: bool,
        extensions: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.source.is_some() {
            return Err(WatchError::AlreadyWatching);
        }
        let directory = directory.as_ref();

        let mut source: Box<dyn EventSource> = match self.backend {
            SourceBackend::Native => Box::new(NotifySource::schedule(
                Arc::clone(&self.handler),
                directory,
                recursive,
            )?),
            SourceBackend::Polling { interval } => Box::new(ScanSource::schedule(
                Arc::clone(&self.handler),
                directory,
                recursive,
                interval,
            )),
        };
        source.start()?;

        // Reset only once the source is up, so a failed start cannot
        // destroy the history a caller may still be reading.
        self.handler.begin_session(ExtensionFilter::only(extensions));
        self.source = Some(source);
        self.root = Some(directory.to_path_buf());
        info!(
            "Started watching {} ({})",
            directory.display(),
            if recursive { "recursive" } else { "top level only" }
        );
        Ok(())
    }

    /// Stop the active session.
    ///
    /// Blocks until the source's background loop has exited, so a subsequent
    /// start cannot race with lingering signals. A safe no-op while idle.
    pub fn stop(&mut self) -> Result<()> {
        match self.source.take() {
            Some(mut source) => {
                source.stop()?;
                let root = self.root.take();
                info!(
                    "Stopped watching {}",
                    root.as_deref().unwrap_or_else(|| Path::new("?")).display()
                );
                Ok(())
            }
            None => {
                debug!("Stop requested while idle");
                Ok(())
            }
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
