//! SQLite-backed persistence of reconciled events.
//!
//! One row per event in `file_events`, with the four read patterns the
//! reporting surface needs: by extension, by kind, by location prefix, and
//! by time range. Registering the store on a handler (it implements
//! [`EventObserver`]) records every event as it is reconciled.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, Row};
use tracing::debug;

use crate::error::Result;
use crate::events::{FileEvent, FileEventKind};
use crate::observer::EventObserver;

const SELECT_COLUMNS: &str =
    "SELECT event_id, event_time, event_type, event_location, file_type, move_destination \
     FROM file_events";

/// One persisted row from the `file_events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEvent {
    pub id: i64,
    /// Epoch seconds at reconciliation time.
    pub time: i64,
    pub event_type: String,
    pub location: String,
    /// Extension of the location under the filter rule, when it has one.
    pub file_type: Option<String>,
    /// Destination path, only for moved events.
    pub move_destination: Option<String>,
}

/// Append-only store of reconciled events.
pub struct EventStore {
    conn: Mutex<Connection>,
}

impl EventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        debug!("Opened event store at {}", path.as_ref().display());
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS file_events (
                event_id         INTEGER PRIMARY KEY AUTOINCREMENT,
                event_time       INTEGER NOT NULL,
                event_type       TEXT NOT NULL,
                event_location   TEXT NOT NULL,
                file_type        TEXT,
                move_destination TEXT
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert one reconciled event, returning its row id.
    pub fn insert_event(&self, event: &FileEvent) -> Result<i64> {
        let location = event.path.to_string_lossy();
        let destination = event
            .destination
            .as_ref()
            .map(|path| path.to_string_lossy().into_owned());

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO file_events (event_time, event_type, event_location, file_type, move_destination)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.timestamp.timestamp(),
                event.kind.as_str(),
                location.as_ref(),
                event.file_type(),
                destination,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Rows whose file type matches `extension` exactly (e.g. `".txt"`).
    pub fn events_by_extension(&self, extension: &str) -> Result<Vec<StoredEvent>> {
        self.select(
            &format!("{SELECT_COLUMNS} WHERE file_type = ?1 ORDER BY event_id"),
            params![extension],
        )
    }

    /// Rows of one event kind.
    pub fn events_by_type(&self, kind: FileEventKind) -> Result<Vec<StoredEvent>> {
        self.select(
            &format!("{SELECT_COLUMNS} WHERE event_type = ?1 ORDER BY event_id"),
            params![kind.as_str()],
        )
    }

    /// Rows whose location starts with `prefix`.
    pub fn events_by_location(&self, prefix: &str) -> Result<Vec<StoredEvent>> {
        self.select(
            &format!("{SELECT_COLUMNS} WHERE event_location LIKE ?1 ORDER BY event_id"),
            params![format!("{prefix}%")],
        )
    }

    /// Rows with `start <= event_time <= end`, both bounds inclusive.
    pub fn events_between(&self, start: i64, end: i64) -> Result<Vec<StoredEvent>> {
        self.select(
            &format!("{SELECT_COLUMNS} WHERE event_time BETWEEN ?1 AND ?2 ORDER BY event_id"),
            params![start, end],
        )
    }

    /// Every row, insertion order.
    pub fn all_events(&self) -> Result<Vec<StoredEvent>> {
        self.select(&format!("{SELECT_COLUMNS} ORDER BY event_id"), params![])
    }

    pub fn event_count(&self) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let count = conn.query_row("SELECT COUNT(*) FROM file_events", [], |row| row.get(0))?;
        Ok(count)
    }

    fn select<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<StoredEvent>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        id: row.get(0)?,
        time: row.get(1)?,
        event_type: row.get(2)?,
        location: row.get(3)?,
        file_type: row.get(4)?,
        move_destination: row.get(5)?,
    })
}

impl EventObserver for EventStore {
    fn notify(&self, event: &FileEvent) -> Result<()> {
        self.insert_event(event).map(|_| ())
    }
}
