use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::filter;

/// What happened to the path a reconciled event concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileEventKind {
    Created,
    Deleted,
    Modified,
    Moved,
    Opened,
    ClosedNoWrite,
    Closed,
}

impl FileEventKind {
    pub const ALL: [FileEventKind; 7] = [
        FileEventKind::Created,
        FileEventKind::Deleted,
        FileEventKind::Modified,
        FileEventKind::Moved,
        FileEventKind::Opened,
        FileEventKind::ClosedNoWrite,
        FileEventKind::Closed,
    ];

    /// Stable lowercase name, as stored and queried in the event store.
    pub fn as_str(&self) -> &'static str {
        match self {
            FileEventKind::Created => "created",
            FileEventKind::Deleted => "deleted",
            FileEventKind::Modified => "modified",
            FileEventKind::Moved => "moved",
            FileEventKind::Opened => "opened",
            FileEventKind::ClosedNoWrite => "closed_no_write",
            FileEventKind::Closed => "closed",
        }
    }
}

impl fmt::Display for FileEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reconciled filesystem event. Immutable once appended to a history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub kind: FileEventKind,
    pub path: PathBuf,
    /// New location, present only for [`FileEventKind::Moved`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// Whether the subject is a directory. Exact under the scanning backend;
    /// best effort for native-backend deletions, where the path is gone
    /// before it can be examined.
    pub is_dir: bool,
    /// Wall-clock time the event was reconciled.
    pub timestamp: DateTime<Utc>,
}

impl FileEvent {
    pub fn new(
        kind: FileEventKind,
        path: impl Into<PathBuf>,
        is_dir: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            path: path.into(),
            destination: None,
            is_dir,
            timestamp,
        }
    }

    pub fn moved(
        from: impl Into<PathBuf>,
        to: impl Into<PathBuf>,
        is_dir: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: FileEventKind::Moved,
            path: from.into(),
            destination: Some(to.into()),
            is_dir,
            timestamp,
        }
    }

    /// Extension of the subject path under the watch-filter rule: the
    /// substring from the last `.` of the file name, dot included.
    pub fn file_type(&self) -> Option<&str> {
        filter::path_extension(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(FileEventKind::Created.as_str(), "created");
        assert_eq!(FileEventKind::ClosedNoWrite.as_str(), "closed_no_write");
        assert_eq!(FileEventKind::Closed.as_str(), "closed");
        assert_eq!(FileEventKind::Moved.to_string(), "moved");
        for kind in FileEventKind::ALL {
            assert!(!kind.as_str().is_empty());
        }
    }

    #[test]
    fn kind_serializes_to_wire_name() {
        let json = serde_json::to_string(&FileEventKind::ClosedNoWrite).unwrap();
        assert_eq!(json, "\"closed_no_write\"");
        let back: FileEventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, FileEventKind::ClosedNoWrite);
    }

    #[test]
    fn moved_event_carries_destination() {
        let event = FileEvent::moved("/a/x.ext", "/a/sub/x.ext", false, Utc::now());
        assert_eq!(event.kind, FileEventKind::Moved);
        assert_eq!(event.path, PathBuf::from("/a/x.ext"));
        assert_eq!(event.destination, Some(PathBuf::from("/a/sub/x.ext")));
    }

    #[test]
    fn plain_event_has_no_destination() {
        let event = FileEvent::new(FileEventKind::Created, "/a/x.txt", false, Utc::now());
        assert_eq!(event.destination, None);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("destination"));
    }

    #[test]
    fn file_type_uses_last_dot_rule() {
        let event = FileEvent::new(FileEventKind::Created, "/tmp/archive.tar.gz", false, Utc::now());
        assert_eq!(event.file_type(), Some(".gz"));
        let bare = FileEvent::new(FileEventKind::Created, "/tmp/Makefile", false, Utc::now());
        assert_eq!(bare.file_type(), None);
    }
}
