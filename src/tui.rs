use std::io;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{
        Block, Borders, Clear, Paragraph, Scrollbar, ScrollbarOrientation, ScrollbarState, Wrap,
    },
    Frame, Terminal,
};
use tracing::error;

use crate::events::{FileEvent, FileEventKind};
use crate::watcher::FileWatcher;

/// Cap on the display log; the reconciler's history is unaffected.
const MAX_DISPLAY_EVENTS: usize = 1000;

pub struct TuiApp {
    pub watcher: FileWatcher,
    rx: Receiver<FileEvent>,
    root: PathBuf,
    recursive: bool,
    extensions: Vec<String>,
    /// Newest first; index 0 is the latest event.
    events: Vec<FileEvent>,
    scroll: usize,
    show_help: bool,
    should_quit: bool,
}

impl TuiApp {
    pub fn new(
        watcher: FileWatcher,
        rx: Receiver<FileEvent>,
        root: PathBuf,
        recursive: bool,
        extensions: Vec<String>,
    ) -> Self {
        Self {
            watcher,
            rx,
            root,
            recursive,
            extensions,
            events: Vec::new(),
            scroll: 0,
            show_help: false,
            should_quit: false,
        }
    }

    pub fn run<B: Backend>(mut self, terminal: &mut Terminal<B>) -> io::Result<()> {
        loop {
            terminal.draw(|f| self.ui(f))?;

            // Drain reconciled events between frames
            match self.rx.recv_timeout(Duration::from_millis(50)) {
                Ok(event) => self.push_event(event),
                Err(_) => {} // Timeout, continue
            }

            // Handle keyboard input
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                            KeyCode::Char('h') | KeyCode::F(1) => {
                                self.show_help = !self.show_help;
                            }
                            KeyCode::Char('s') => self.toggle_watching(),
                            KeyCode::Up | KeyCode::Char('k') => {
                                if self.scroll > 0 {
                                    self.scroll -= 1;
                                }
                            }
                            KeyCode::Down | KeyCode::Char('j') => {
                                let max_scroll = self.events.len().saturating_sub(1);
                                if self.scroll < max_scroll {
                                    self.scroll += 1;
                                }
                            }
                            KeyCode::PageUp => {
                                self.scroll = self.scroll.saturating_sub(10);
                            }
                            KeyCode::PageDown => {
                                let max_scroll = self.events.len().saturating_sub(1);
                                self.scroll = (self.scroll + 10).min(max_scroll);
                            }
                            KeyCode::Home => {
                                self.scroll = 0;
                            }
                            KeyCode::End => {
                                self.scroll = self.events.len().saturating_sub(1);
                            }
                            _ => {}
                        }
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }

        Ok(())
    }

    fn push_event(&mut self, event: FileEvent) {
        self.events.insert(0, event);
        self.events.truncate(MAX_DISPLAY_EVENTS);
    }

    fn toggle_watching(&mut self) {
        if self.watcher.is_watching() {
            if let Err(err) = self.watcher.stop() {
                error!("Failed to stop watching: {err}");
            }
        } else if let Err(err) =
            self.watcher
                .start(&self.root, self.recursive, self.extensions.clone())
        {
            error!("Failed to resume watching: {err}");
        }
    }

    fn ui(&mut self, f: &mut Frame) {
        if self.show_help {
            self.render_help(f);
            return;
        }

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Percentage(70), // Event log
                Constraint::Percentage(25), // Session panel
                Constraint::Min(3),         // Status bar
            ])
            .split(f.area());

        self.render_event_log(f, chunks[0]);
        self.render_session(f, chunks[1]);
        self.render_status(f, chunks[2]);
    }

    fn render_event_log(&mut self, f: &mut Frame, area: Rect) {
        let mut lines = Vec::new();
        // Account for borders; a tiny terminal can leave no rows at all
        let visible_height = (area.height as usize).saturating_sub(2);

        if self.events.is_empty() {
            lines.push(Line::from(vec![Span::styled(
                "Watching for file changes...",
                Style::default().fg(Color::Gray),
            )]));
        } else {
            // Ensure scroll position is within bounds
            let max_scroll = self.events.len().saturating_sub(1);
            if self.scroll > max_scroll {
                self.scroll = max_scroll;
            }

            let start_idx = self.scroll.min(self.events.len());
            let end_idx = (start_idx + visible_height).min(self.events.len());

            if start_idx < self.events.len() && start_idx <= end_idx {
                for event in &self.events[start_idx..end_idx] {
                    lines.push(format_event_line(event));
                }
            }
        }

        let paragraph = Paragraph::new(lines)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Rgb(80, 80, 80)))
                    .title(" Events, newest first (up/down to scroll, PgUp/PgDn, Home/End) ")
                    .title_style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            )
            .wrap(Wrap { trim: true });

        f.render_widget(paragraph, area);

        // Render scrollbar
        if self.events.len() > visible_height {
            let scrollbar = Scrollbar::new(ScrollbarOrientation::VerticalRight);
            let safe_position = self.scroll.min(self.events.len().saturating_sub(1));
            let mut scrollbar_state =
                ScrollbarState::new(self.events.len()).position(safe_position);
            f.render_stateful_widget(
                scrollbar,
                area.inner(ratatui::layout::Margin {
                    vertical: 1,
                    horizontal: 1,
                }),
                &mut scrollbar_state,
            );
        }
    }

    fn render_session(&self, f: &mut Frame, area: Rect) {
        let stats = self.watcher.handler().stats();
        let state = if self.watcher.is_watching() {
            Span::styled("watching", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD))
        } else {
            Span::styled("paused", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        };
        let filter = if self.extensions.is_empty() {
            "all files".to_string()
        } else {
            self.extensions.join(",")
        };
        let scope = if self.recursive { "recursive" } else { "top level only" };

        let label_style = Style::default().fg(Color::Rgb(150, 150, 150));
        let value_style = Style::default().fg(Color::White);

        let lines = vec![
            Line::from(vec![
                Span::styled("Root: ", label_style),
                Span::styled(self.root.display().to_string(), value_style),
                Span::styled(format!(" ({scope})"), label_style),
            ]),
            Line::from(vec![
                Span::styled("State: ", label_style),
                state,
                Span::styled("   Filter: ", label_style),
                Span::styled(filter, value_style),
            ]),
            Line::from(vec![
                Span::styled("Reconciled: ", label_style),
                Span::styled(stats.reconciled.to_string(), Style::default().fg(Color::Green)),
                Span::styled("   Suppressed: ", label_style),
                Span::styled(stats.suppressed.to_string(), Style::default().fg(Color::Yellow)),
                Span::styled("   Retracted: ", label_style),
                Span::styled(stats.retracted.to_string(), Style::default().fg(Color::Blue)),
                Span::styled("   Filtered: ", label_style),
                Span::styled(stats.filtered.to_string(), Style::default().fg(Color::Gray)),
            ]),
        ];

        let panel = Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Rgb(80, 80, 80)))
                .title(" Session ")
                .title_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        );

        f.render_widget(panel, area);
    }

    fn render_status(&self, f: &mut Frame, area: Rect) {
        let status_text = vec![Line::from(vec![
            Span::styled("Press ", Style::default().fg(Color::Rgb(150, 150, 150))),
            Span::styled(" q ", Style::default().fg(Color::White).bg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(" to quit, ", Style::default().fg(Color::Rgb(150, 150, 150))),
            Span::styled(" s ", Style::default().fg(Color::White).bg(Color::Blue).add_modifier(Modifier::BOLD)),
            Span::styled(" to pause/resume, ", Style::default().fg(Color::Rgb(150, 150, 150))),
            Span::styled(" h ", Style::default().fg(Color::White).bg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::styled(" for help", Style::default().fg(Color::Rgb(150, 150, 150))),
        ])];

        let status = Paragraph::new(status_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::Rgb(80, 80, 80)))
                    .title(" Status ")
                    .title_style(Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD)),
            )
            .alignment(Alignment::Center);

        f.render_widget(status, area);
    }

    fn render_help(&self, f: &mut Frame) {
        let popup_area = self.centered_rect(80, 60, f.area());

        let help_text = vec![
            Line::from(vec![Span::styled(
                "Filewatch - Directory Event Monitor",
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )]),
            Line::from(""),
            Line::from("Keyboard Shortcuts:"),
            Line::from(""),
            Line::from(vec![
                Span::styled("  q, Esc     ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
                Span::styled("- Quit the application", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  h, F1      ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
                Span::styled("- Show/hide this help", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  s          ", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
                Span::styled("- Pause or resume watching", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  Up, k      ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
                Span::styled("- Scroll event log up", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  Down, j    ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
                Span::styled("- Scroll event log down", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  PgUp/PgDn  ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
                Span::styled("- Scroll event log (fast)", Style::default()),
            ]),
            Line::from(vec![
                Span::styled("  Home/End   ", Style::default().fg(Color::Blue).add_modifier(Modifier::BOLD)),
                Span::styled("- Jump to newest/oldest event", Style::default()),
            ]),
            Line::from(""),
            Line::from("Event kinds:"),
            Line::from(""),
            Line::from("  created, modified, deleted, moved, opened, closed, closed_no_write"),
            Line::from(""),
            Line::from("Noise from platform watchers (modified storms around creations,"),
            Line::from("deletions, and moves) is reconciled away before events reach this log."),
        ];

        let paragraph = Paragraph::new(help_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help ")
                    .title_style(Style::default().fg(Color::Cyan)),
            )
            .wrap(Wrap { trim: true });

        f.render_widget(Clear, popup_area);
        f.render_widget(paragraph, popup_area);
    }

    fn centered_rect(&self, percent_x: u16, percent_y: u16, r: Rect) -> Rect {
        let popup_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Percentage((100 - percent_y) / 2),
                Constraint::Percentage(percent_y),
                Constraint::Percentage((100 - percent_y) / 2),
            ])
            .split(r);

        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage((100 - percent_x) / 2),
                Constraint::Percentage(percent_x),
                Constraint::Percentage((100 - percent_x) / 2),
            ])
            .split(popup_layout[1])[1]
    }
}

fn format_event_line(event: &FileEvent) -> Line<'_> {
    let time_str = event.timestamp.format("%H:%M:%S").to_string();

    let (label, color, bg_color) = match event.kind {
        FileEventKind::Created => ("CREATED ", Color::Green, Color::Rgb(0, 40, 0)),
        FileEventKind::Modified => ("MODIFIED", Color::Yellow, Color::Rgb(40, 40, 0)),
        FileEventKind::Deleted => ("DELETED ", Color::Red, Color::Rgb(40, 0, 0)),
        FileEventKind::Moved => ("MOVED   ", Color::Blue, Color::Rgb(0, 0, 40)),
        FileEventKind::Opened => ("OPENED  ", Color::Cyan, Color::Rgb(0, 30, 30)),
        FileEventKind::ClosedNoWrite => ("CLOSED- ", Color::Gray, Color::Rgb(25, 25, 25)),
        FileEventKind::Closed => ("CLOSED  ", Color::Magenta, Color::Rgb(30, 0, 30)),
    };

    let mut spans = vec![
        Span::styled(format!("[{time_str}] "), Style::default().fg(Color::Rgb(100, 100, 100))),
        Span::styled(
            format!(" {label} "),
            Style::default().fg(color).bg(bg_color).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!(" {}", event.path.display()),
            Style::default().fg(Color::White),
        ),
    ];

    if let Some(dest) = &event.destination {
        spans.push(Span::styled(
            format!(" -> {}", dest.display()),
            Style::default().fg(Color::Blue),
        ));
    }
    if event.is_dir {
        spans.push(Span::styled(" [dir]", Style::default().fg(Color::Rgb(120, 120, 120))));
    }

    Line::from(spans)
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>, io::Error> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

pub fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<(), io::Error> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FileHandler;
    use crate::source::SourceBackend;
    use chrono::Utc;
    use ratatui::backend::TestBackend;
    use std::sync::{mpsc, Arc};

    fn app_with_events(count: usize) -> TuiApp {
        let watcher = FileWatcher::new(
            Arc::new(FileHandler::new()),
            SourceBackend::Polling {
                interval: Duration::from_millis(50),
            },
        );
        let (_tx, rx) = mpsc::channel();
        let mut app = TuiApp::new(watcher, rx, PathBuf::from("/w"), false, vec![".txt".into()]);
        for i in 0..count {
            app.push_event(FileEvent::new(
                FileEventKind::Created,
                format!("/w/file{i}.txt"),
                false,
                Utc::now(),
            ));
        }
        app
    }

    #[test]
    fn renders_on_a_terminal_too_short_for_borders() {
        let mut terminal = Terminal::new(TestBackend::new(40, 1)).unwrap();
        let mut app = app_with_events(3);
        terminal.draw(|f| app.ui(f)).unwrap();
    }

    #[test]
    fn renders_the_event_log_on_a_regular_terminal() {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        let mut app = app_with_events(2);
        terminal.draw(|f| app.ui(f)).unwrap();
    }
}
