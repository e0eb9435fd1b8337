use anyhow::Result;
use clap::Parser;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use filewatch::{
    cli::{Cli, OutputFormat},
    events::{FileEvent, FileEventKind},
    handler::FileHandler,
    observer::ChannelObserver,
    report::write_csv_report,
    store::EventStore,
    tui::{restore_terminal, setup_terminal, TuiApp},
    watcher::FileWatcher,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(err) = cli.validate() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    cli.setup_logging();

    let watch_path = cli.get_watch_path();
    tracing::info!("Starting filewatch on: {}", watch_path.display());

    let handler = Arc::new(FileHandler::new());

    // One store backs both --database recording and the shutdown report
    let store = build_store(&cli)?;
    if let Some(store) = &store {
        handler.register_observer(Arc::clone(store));
    }

    let (tx, rx) = mpsc::channel();
    handler.register_observer(ChannelObserver::new(tx));

    let mut watcher = FileWatcher::new(Arc::clone(&handler), cli.source_backend());
    watcher.start(&watch_path, cli.recursive, cli.watched_extensions())?;

    match cli.output {
        OutputFormat::Tui => run_tui_mode(watcher, rx, &cli)?,
        OutputFormat::Text => run_text_mode(watcher, rx, &cli)?,
        OutputFormat::Json => run_json_mode(watcher, rx)?,
    }

    if let (Some(store), Some(report_path)) = (&store, &cli.report) {
        let rows = store.all_events()?;
        write_csv_report(&rows, report_path)?;
    }

    Ok(())
}

fn build_store(cli: &Cli) -> Result<Option<Arc<EventStore>>> {
    let store = match (&cli.database, &cli.report) {
        (Some(path), _) => Some(EventStore::open(path)?),
        (None, Some(_)) => Some(EventStore::open_in_memory()?),
        (None, None) => None,
    };
    Ok(store.map(Arc::new))
}

fn run_tui_mode(watcher: FileWatcher, rx: Receiver<FileEvent>, cli: &Cli) -> Result<()> {
    let mut terminal = setup_terminal()?;

    let app = TuiApp::new(
        watcher,
        rx,
        cli.get_watch_path(),
        cli.recursive,
        cli.watched_extensions(),
    );

    let res = app.run(&mut terminal);

    if let Err(err) = restore_terminal(&mut terminal) {
        eprintln!("Failed to restore terminal: {}", err);
    }

    if let Err(err) = res {
        eprintln!("Application error: {}", err);
        std::process::exit(1);
    }

    Ok(())
}

fn run_text_mode(mut watcher: FileWatcher, rx: Receiver<FileEvent>, cli: &Cli) -> Result<()> {
    println!("Watching: {}", cli.get_watch_path().display());
    println!("Press Ctrl+C to quit");
    println!("---");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => print_text_event(&event, cli),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    watcher.stop()?;
    Ok(())
}

fn run_json_mode(mut watcher: FileWatcher, rx: Receiver<FileEvent>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(event) => println!("{}", serde_json::to_string(&event)?),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    watcher.stop()?;
    Ok(())
}

fn print_text_event(event: &FileEvent, cli: &Cli) {
    let time_str = event.timestamp.format("%H:%M:%S");

    let event_type = match event.kind {
        FileEventKind::Created => "CREATED",
        FileEventKind::Modified => "MODIFIED",
        FileEventKind::Deleted => "DELETED",
        FileEventKind::Moved => "MOVED",
        FileEventKind::Opened => "OPENED",
        FileEventKind::ClosedNoWrite => "CLOSED_NO_WRITE",
        FileEventKind::Closed => "CLOSED",
    };

    let location = match &event.destination {
        Some(dest) => format!("{} -> {}", event.path.display(), dest.display()),
        None => event.path.display().to_string(),
    };

    if cli.no_color {
        println!("[{}] {} {}", time_str, event_type, location);
    } else {
        let color = match event.kind {
            FileEventKind::Created => "\x1b[32m",        // Green
            FileEventKind::Modified => "\x1b[33m",       // Yellow
            FileEventKind::Deleted => "\x1b[31m",        // Red
            FileEventKind::Moved => "\x1b[34m",          // Blue
            FileEventKind::Opened => "\x1b[36m",         // Cyan
            FileEventKind::ClosedNoWrite => "\x1b[90m",  // Gray
            FileEventKind::Closed => "\x1b[35m",         // Magenta
        };
        println!("[{}] {}{}\x1b[0m {}", time_str, color, event_type, location);
    }
}
