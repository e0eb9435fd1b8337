use std::fs;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use filewatch::events::FileEventKind;
use filewatch::handler::FileHandler;
use filewatch::observer::{ChannelObserver, CollectingObserver};
use filewatch::report::{render_csv, CSV_HEADER};
use filewatch::source::SourceBackend;
use filewatch::store::EventStore;
use filewatch::watcher::FileWatcher;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Long enough for several poll cycles to observe a change.
const SETTLE: Duration = Duration::from_millis(700);

/// Longer than the cascade suppression window, so consecutive operations
/// reconcile independently of each other.
const BEYOND_WINDOW: Duration = Duration::from_millis(1100);

fn polling_watcher() -> (Arc<FileHandler>, FileWatcher) {
    let handler = Arc::new(FileHandler::new());
    let watcher = FileWatcher::new(
        Arc::clone(&handler),
        SourceBackend::Polling {
            interval: POLL_INTERVAL,
        },
    );
    (handler, watcher)
}

fn watch_all() -> Vec<String> {
    Vec::new()
}

#[test]
fn test_empty_session_has_no_events() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), false, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));
    watcher.stop().expect("Failed to stop watching");

    assert!(handler.history().is_empty());
    assert!(handler.current_event().is_none());
}

#[test]
fn test_file_creation_reconciles_to_a_single_event() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), false, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::write(temp_dir.path().join("a.txt"), "hello").expect("Failed to write test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    // The watched directory itself also changes, but that snapshot noise
    // must not survive reconciliation.
    let history = handler.history();
    assert_eq!(history.len(), 1, "history was {:?}", history);
    assert_eq!(history[0].kind, FileEventKind::Created);
    assert!(history[0].path.ends_with("a.txt"));
    assert_eq!(handler.current_event().unwrap().kind, FileEventKind::Created);
}

#[test]
fn test_extension_filter_limits_the_history() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), false, [".py", ".txt"])
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::write(temp_dir.path().join("a.py"), "x = 1").expect("Failed to write test file");
    std::thread::sleep(BEYOND_WINDOW);
    fs::write(temp_dir.path().join("b.sql"), "SELECT 1;").expect("Failed to write test file");
    std::thread::sleep(BEYOND_WINDOW);
    fs::write(temp_dir.path().join("c.txt"), "notes").expect("Failed to write test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 2, "history was {:?}", history);
    assert!(history[0].path.ends_with("a.py"));
    assert!(history[1].path.ends_with("c.txt"));
    assert!(history.iter().all(|e| e.kind == FileEventKind::Created));
    assert!(handler.stats().filtered > 0);
}

#[test]
fn test_deletion_is_reported() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let doomed = temp_dir.path().join("a.txt");
    fs::write(&doomed, "short-lived").expect("Failed to write test file");

    let (handler, mut watcher) = polling_watcher();
    watcher
        .start(temp_dir.path(), false, [".txt"])
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::remove_file(&doomed).expect("Failed to delete test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 1, "history was {:?}", history);
    assert_eq!(history[0].kind, FileEventKind::Deleted);
    assert!(history[0].path.ends_with("a.txt"));
}

#[test]
fn test_modification_after_the_noise_window_is_kept() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), false, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    let file = temp_dir.path().join("a.txt");
    fs::write(&file, "first").expect("Failed to write test file");
    std::thread::sleep(BEYOND_WINDOW);
    fs::write(&file, "second").expect("Failed to modify test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let kinds: Vec<FileEventKind> = handler.history().iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![FileEventKind::Created, FileEventKind::Modified]);
}

#[test]
fn test_nested_changes_respect_the_recursive_flag() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), false, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    let sub = temp_dir.path().join("sub");
    fs::create_dir(&sub).expect("Failed to create subdirectory");
    std::thread::sleep(BEYOND_WINDOW);

    // Non-recursive: the nested file itself is out of scope, but the entry
    // it lands in visibly changes.
    fs::write(sub.join("inner.txt"), "nested").expect("Failed to write nested file");
    std::thread::sleep(BEYOND_WINDOW);

    fs::write(temp_dir.path().join("top.txt"), "top").expect("Failed to write test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 3, "history was {:?}", history);
    assert_eq!(history[0].kind, FileEventKind::Created);
    assert!(history[0].path.ends_with("sub"));
    assert!(history[0].is_dir);
    assert_eq!(history[1].kind, FileEventKind::Modified);
    assert!(history[1].path.ends_with("sub"));
    assert_eq!(history[2].kind, FileEventKind::Created);
    assert!(history[2].path.ends_with("top.txt"));
    assert!(history.iter().all(|e| !e.path.ends_with("inner.txt")));
}

#[test]
fn test_recursive_watch_sees_nested_changes() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    watcher
        .start(temp_dir.path(), true, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    let sub = temp_dir.path().join("sub");
    fs::create_dir(&sub).expect("Failed to create subdirectory");
    std::thread::sleep(BEYOND_WINDOW);

    fs::write(sub.join("inner.txt"), "nested").expect("Failed to write nested file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 2, "history was {:?}", history);
    assert_eq!(history[0].kind, FileEventKind::Created);
    assert!(history[0].path.ends_with("sub"));
    assert_eq!(history[1].kind, FileEventKind::Created);
    assert!(history[1].path.ends_with("inner.txt"));
}

#[test]
fn test_rename_is_reported_as_one_move() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = temp_dir.path().join("a.txt");
    let target_dir = temp_dir.path().join("sub");
    fs::write(&source, "movable").expect("Failed to write test file");
    fs::create_dir(&target_dir).expect("Failed to create subdirectory");

    let handler = Arc::new(FileHandler::new());
    let mut watcher = FileWatcher::new(Arc::clone(&handler), SourceBackend::Native);
    watcher
        .start(temp_dir.path(), true, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::rename(&source, target_dir.join("moved.txt")).expect("Failed to rename test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 1, "history was {:?}", history);
    let event = &history[0];
    assert_eq!(event.kind, FileEventKind::Moved);
    assert!(event.path.ends_with("a.txt"));
    let destination = event.destination.as_ref().expect("Move without destination");
    assert!(destination.ends_with("sub/moved.txt"));
}

#[test]
fn test_polling_backend_reports_a_rename_as_one_move() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = temp_dir.path().join("a.txt");
    let target_dir = temp_dir.path().join("sub");
    fs::write(&source, "movable").expect("Failed to write test file");
    fs::create_dir(&target_dir).expect("Failed to create subdirectory");

    let (handler, mut watcher) = polling_watcher();
    watcher
        .start(temp_dir.path(), true, watch_all())
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::rename(&source, target_dir.join("moved.txt")).expect("Failed to rename test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let history = handler.history();
    assert_eq!(history.len(), 1, "history was {:?}", history);
    let event = &history[0];
    assert_eq!(event.kind, FileEventKind::Moved);
    assert!(event.path.ends_with("a.txt"));
    let destination = event.destination.as_ref().expect("Move without destination");
    assert!(destination.ends_with("sub/moved.txt"));
}

#[test]
fn test_observers_receive_events_through_the_pipeline() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let (handler, mut watcher) = polling_watcher();

    let collector = CollectingObserver::new();
    let collected = collector.events();
    handler.register_observer(collector);

    let (tx, rx) = mpsc::channel();
    handler.register_observer(ChannelObserver::new(tx));

    watcher
        .start(temp_dir.path(), false, [".txt"])
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::write(temp_dir.path().join("a.txt"), "observed").expect("Failed to write test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let seen = collected.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].kind, FileEventKind::Created);

    let streamed = rx.try_recv().expect("Channel observer delivered nothing");
    assert_eq!(streamed.kind, FileEventKind::Created);
    assert!(streamed.path.ends_with("a.txt"));

    assert_eq!(handler.stats().reconciled, 1);
}

#[test]
fn test_database_records_a_session_and_feeds_the_report() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("events.sqlite");
    let store = Arc::new(EventStore::open(&db_path).expect("Failed to open event store"));

    let (handler, mut watcher) = polling_watcher();
    handler.register_observer(Arc::clone(&store));

    watcher
        .start(temp_dir.path(), false, [".txt"])
        .expect("Failed to start watching");
    std::thread::sleep(Duration::from_millis(300));

    fs::write(temp_dir.path().join("a.txt"), "one").expect("Failed to write test file");
    std::thread::sleep(SETTLE);
    fs::write(temp_dir.path().join("b.txt"), "two").expect("Failed to write test file");
    std::thread::sleep(SETTLE);

    watcher.stop().expect("Failed to stop watching");

    let rows = store.all_events().expect("Failed to query event store");
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|row| row.event_type == "created"));
    assert!(rows.iter().all(|row| row.file_type.as_deref() == Some(".txt")));
    assert_eq!(
        store
            .events_by_extension(".txt")
            .expect("Failed to query by extension")
            .len(),
        2
    );

    let csv = render_csv(&rows);
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], CSV_HEADER);
}
