//! CSV report generation from stored events.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::store::StoredEvent;

/// Column header line, matching the `file_events` table layout.
pub const CSV_HEADER: &str = "event_time,event_type,event_location,file_type,move_destination";

/// Write `rows` as a CSV report at `path`. The file always starts with
/// [`CSV_HEADER`], so a report over N rows has N + 1 lines.
pub fn write_csv_report<P: AsRef<Path>>(rows: &[StoredEvent], path: P) -> Result<()> {
    fs::write(path.as_ref(), render_csv(rows))?;
    info!(
        "Wrote report of {} event(s) to {}",
        rows.len(),
        path.as_ref().display()
    );
    Ok(())
}

/// Render `rows` as CSV text, one line per row plus the header.
pub fn render_csv(rows: &[StoredEvent]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in rows {
        out.push_str(&render_row(row));
        out.push('\n');
    }
    out
}

fn render_row(row: &StoredEvent) -> String {
    [
        row.time.to_string(),
        escape_field(&row.event_type),
        escape_field(&row.location),
        escape_field(row.file_type.as_deref().unwrap_or("")),
        escape_field(row.move_destination.as_deref().unwrap_or("")),
    ]
    .join(",")
}

/// Quote a field only when it needs it (embedded comma, quote, or newline).
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(time: i64, event_type: &str, location: &str) -> StoredEvent {
        StoredEvent {
            id: time,
            time,
            event_type: event_type.to_string(),
            location: location.to_string(),
            file_type: None,
            move_destination: None,
        }
    }

    #[test]
    fn report_has_one_line_per_row_plus_header() {
        let rows = vec![
            row(100, "created", "/w/a.txt"),
            row(200, "modified", "/w/a.txt"),
            row(300, "deleted", "/w/a.txt"),
        ];
        let csv = render_csv(&rows);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], "100,created,/w/a.txt,,");
    }

    #[test]
    fn empty_report_is_just_the_header() {
        assert_eq!(render_csv(&[]), format!("{CSV_HEADER}\n"));
    }

    #[test]
    fn optional_columns_render_as_empty_cells() {
        let mut moved = row(100, "moved", "/w/b.py");
        moved.file_type = Some(".py".to_string());
        moved.move_destination = Some("/w/sub/b.py".to_string());
        let csv = render_csv(&[moved]);
        assert!(csv.contains("100,moved,/w/b.py,.py,/w/sub/b.py"));
    }

    #[test]
    fn fields_with_commas_and_quotes_are_quoted() {
        let tricky = row(100, "created", "/w/a,\"b\".txt");
        let csv = render_csv(&[tricky]);
        assert!(csv.contains("100,created,\"/w/a,\"\"b\"\".txt\",,"));
    }

    #[test]
    fn report_lands_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let report_path = temp_dir.path().join("events.csv");

        write_csv_report(&[row(100, "created", "/w/a.txt")], &report_path).unwrap();

        let content = fs::read_to_string(report_path).unwrap();
        assert_eq!(content, format!("{CSV_HEADER}\n100,created,/w/a.txt,,\n"));
    }
}
