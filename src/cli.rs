use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::source::SourceBackend;

#[derive(Parser)]
#[command(name = "filewatch")]
#[command(version = "0.1.0")]
#[command(about = "Watch a directory and reconcile raw change signals into a clean event history")]
#[command(
    long_about = "Filewatch monitors a directory, classifies raw filesystem signals into typed events, and suppresses the cascade noise platform watchers emit around creations, deletions, and moves. Events can be streamed to the terminal, browsed in a TUI, recorded to SQLite, and summarized as a CSV report."
)]
pub struct Cli {
    /// Directory to watch for changes
    #[arg(value_name = "PATH", help = "Path to watch (defaults to current directory)")]
    pub path: Option<PathBuf>,

    /// Watch mode - which source backend delivers raw signals
    #[arg(short, long, default_value = "auto", help = "File watching mode")]
    pub mode: WatchMode,

    /// Watch subdirectories as well as the top level
    #[arg(short, long, help = "Watch the directory tree recursively")]
    pub recursive: bool,

    /// Show only specific file types
    #[arg(long, value_delimiter = ',', help = "File extensions to watch (e.g., py,txt,sql)")]
    pub extensions: Option<Vec<String>>,

    /// Record reconciled events to a SQLite database
    #[arg(long, value_name = "FILE", help = "SQLite file to record events into")]
    pub database: Option<PathBuf>,

    /// Write a CSV report of recorded events on exit
    #[arg(long, value_name = "FILE", help = "CSV report to write on shutdown")]
    pub report: Option<PathBuf>,

    /// Output format for event streaming
    #[arg(long, default_value = "tui", help = "Output format")]
    pub output: OutputFormat,

    /// Polling interval in milliseconds (for polling mode)
    #[arg(long, default_value = "200", help = "Polling interval in ms")]
    pub poll_interval: u64,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colors in output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WatchMode {
    /// Platform-recommended native events
    Auto,
    /// Use native file system events
    Native,
    /// Use polling-based watching
    Polling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Terminal user interface (default)
    Tui,
    /// Plain text output
    Text,
    /// JSON output for scripting
    Json,
}

impl Cli {
    pub fn get_watch_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }

    /// Extensions normalized to the `.ext` form the filter expects. Entries
    /// may be given with or without the leading dot; blanks are dropped.
    pub fn watched_extensions(&self) -> Vec<String> {
        self.extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|ext| ext.trim())
            .filter(|ext| !ext.is_empty())
            .map(|ext| {
                if ext.starts_with('.') {
                    ext.to_string()
                } else {
                    format!(".{ext}")
                }
            })
            .collect()
    }

    pub fn source_backend(&self) -> SourceBackend {
        match self.mode {
            WatchMode::Auto | WatchMode::Native => SourceBackend::Native,
            WatchMode::Polling => SourceBackend::Polling {
                interval: Duration::from_millis(self.poll_interval),
            },
        }
    }

    pub fn setup_logging(&self) {
        let level = if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        };

        tracing_subscriber::fmt()
            .with_max_level(level)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }

    pub fn validate(&self) -> Result<(), String> {
        let path = self.get_watch_path();

        if !path.exists() {
            return Err(format!("Path does not exist: {}", path.display()));
        }

        if !path.is_dir() {
            return Err(format!("Path is not a directory: {}", path.display()));
        }

        if self.poll_interval == 0 {
            return Err("Poll interval must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            path: None,
            mode: WatchMode::Auto,
            recursive: false,
            extensions: None,
            database: None,
            report: None,
            output: OutputFormat::Tui,
            poll_interval: 200,
            verbose: false,
            no_color: false,
        }
    }
}
