mod ui;

use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    tty::IsTty,
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    Terminal,
};
use std::{
    error::Error,
    fs::{self, File},
    io::{self, stdin},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};
use tracing_subscriber::EnvFilter;
use typeflow::{
    app_dirs::AppDirs,
    config::{Config, ConfigStore, FileConfigStore},
    encoding::TextEncoding,
    history::{HistoryStore, JsonHistoryStore, TestRecord},
    runtime::{
        is_counted_key, AppEvent, AppEventSource, CrosstermEventSource, FixedTicker, Runner,
        Ticker,
    },
    session::{KeyOutcome, PracticeSession, SessionError},
    Alert, AlertSink, ChannelSink, RateMonitor,
};

const TICK_RATE_MS: u64 = 100;

/// typing practice tui that reveals a text file as you type and warns about sudden speed changes
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    /// history file to read and write (defaults to the state directory)
    #[clap(long, global = true)]
    history_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// type through a text file, one character per key press
    Practice {
        /// text file to practice on
        file: PathBuf,
    },
    /// print the most recent sessions, newest first
    History {
        /// number of sessions to show
        #[clap(short = 'n', long)]
        count: Option<usize>,
    },
    /// delete every recorded session
    ClearHistory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Typing,
    Summary,
    History,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

/// A speed alert currently shown on screen
#[derive(Debug, Clone)]
pub struct Toast {
    pub alert: Alert,
    pub shown_at: Instant,
}

pub struct App {
    pub session: PracticeSession,
    pub state: AppState,
    pub history: JsonHistoryStore,
    pub recent: Vec<TestRecord>,
    pub toast: Option<Toast>,
    pub status: Option<String>,
    pub config: Config,
    /// Waiting for y/n before clearing history
    pub confirm_clear: bool,
}

impl App {
    pub fn new(
        config: Config,
        history: JsonHistoryStore,
        monitor: Arc<RateMonitor>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            session: PracticeSession::new(monitor, sink),
            state: AppState::Typing,
            history,
            recent: Vec::new(),
            toast: None,
            status: None,
            config,
            confirm_clear: false,
        }
    }

    pub fn load(&mut self, file: &Path) -> Result<TextEncoding, SessionError> {
        let encoding = self.session.load(file)?;
        self.state = AppState::Typing;
        self.toast = None;
        self.status = None;
        Ok(encoding)
    }

    fn on_key(&mut self, key: KeyEvent) -> Flow {
        if key.kind == KeyEventKind::Release {
            return Flow::Continue;
        }

        // ctrl+c quits from anywhere
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            if self.state == AppState::Typing {
                self.end_session();
            }
            return Flow::Quit;
        }

        match self.state {
            AppState::Typing => {
                if key.code == KeyCode::Esc {
                    self.end_session();
                } else if is_counted_key(&key) {
                    match self.session.on_key() {
                        Ok(KeyOutcome::Finished) => self.end_session(),
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to read text");
                            self.status = Some(e.to_string());
                            self.end_session();
                        }
                    }
                }
            }
            AppState::Summary => match key.code {
                KeyCode::Char('r') => self.retry(),
                KeyCode::Char('h') => {
                    self.recent = self.history.recent(self.config.recent_count);
                    self.state = AppState::History;
                }
                KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
                _ => {}
            },
            AppState::History if self.confirm_clear => {
                if key.code == KeyCode::Char('y') {
                    self.clear_history();
                }
                self.confirm_clear = false;
            }
            AppState::History => match key.code {
                KeyCode::Char('b') | KeyCode::Esc | KeyCode::Backspace => {
                    self.state = AppState::Summary;
                }
                KeyCode::Char('c') if !self.recent.is_empty() => self.confirm_clear = true,
                KeyCode::Char('q') => return Flow::Quit,
                _ => {}
            },
        }

        Flow::Continue
    }

    /// Stop typing, persist the session if any key was pressed, and show the summary.
    fn end_session(&mut self) {
        let started = self.session.has_started();
        self.session.stop();
        self.toast = None;
        self.state = AppState::Summary;

        if !started {
            return;
        }
        let record = self.session.record();
        tracing::info!(
            chars = record.typed_chars,
            keys = record.total_keystrokes,
            wpm = record.wpm_estimated,
            "session finished"
        );
        if let Err(e) = self.history.save(record) {
            tracing::warn!(error = %e, "failed to save session");
            self.status = Some(e.to_string());
        }
    }

    fn clear_history(&mut self) {
        let removed = self.history.count();
        match self.history.clear() {
            Ok(()) => {
                tracing::info!(removed, "history cleared");
                self.recent.clear();
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to clear history");
                self.status = Some(e.to_string());
            }
        }
    }

    fn retry(&mut self) {
        let Some(file) = self.session.path().map(Path::to_path_buf) else {
            return;
        };
        if let Err(e) = self.load(&file) {
            tracing::warn!(error = %e, "failed to reload text");
            self.status = Some(e.to_string());
        }
    }

    fn on_alert(&mut self, alert: Alert, now: Instant) {
        if self.state != AppState::Typing {
            return;
        }
        tracing::debug!(kind = %alert.kind, "showing alert");
        self.toast = Some(Toast {
            alert,
            shown_at: now,
        });
    }

    fn on_tick(&mut self, now: Instant) {
        let display = Duration::from_secs(self.config.alert_display_secs);
        if matches!(&self.toast, Some(t) if now.saturating_duration_since(t.shown_at) >= display) {
            self.toast = None;
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(matches!(cli.command, Command::Practice { .. }));

    let mut config = FileConfigStore::new().load();
    if let Some(path) = cli.history_file {
        config.history_file = Some(path);
    }

    match cli.command {
        Command::Practice { file } => practice(config, &file),
        Command::History { count } => {
            let history = JsonHistoryStore::open(config.history_path());
            print_history(&history, count.unwrap_or(config.recent_count));
            Ok(())
        }
        Command::ClearHistory => {
            let mut history = JsonHistoryStore::open(config.history_path());
            let removed = history.count();
            history.clear()?;
            println!(
                "Removed {} record(s) from {}",
                removed,
                history.path().display()
            );
            Ok(())
        }
    }
}

/// Log to a file while the TUI owns the terminal, to stderr otherwise.
fn init_logging(to_file: bool) {
    let filter = |default: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
    };

    if !to_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter("typeflow=warn"))
            .with_writer(io::stderr)
            .init();
        return;
    }

    let log_file = AppDirs::log_path().and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        File::options().create(true).append(true).open(path).ok()
    });

    // without a log file stay silent rather than draw over the screen
    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_env_filter(filter("typeflow=info"))
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .init();
    }
}

fn print_history(history: &JsonHistoryStore, count: usize) {
    let records = history.recent(count);
    if records.is_empty() {
        println!("No typing history yet.");
        return;
    }

    println!(
        "{:<19}  {:>10}  {:>8}  {:>6}  {:>6}  {:>9}",
        "date", "speed/min", "wpm", "chars", "keys", "time"
    );
    for r in records {
        println!(
            "{:<19}  {:>10.2}  {:>8.2}  {:>6}  {:>6}  {:>8.2}s",
            r.timestamp, r.speed, r.wpm_estimated, r.typed_chars, r.total_keystrokes, r.duration
        );
    }
}

fn practice(config: Config, file: &Path) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let source = CrosstermEventSource::new();
    let sink: Arc<dyn AlertSink> = Arc::new(ChannelSink::new(source.sender()));
    let history = JsonHistoryStore::open(config.history_path());
    let mut app = App::new(config, history, Arc::new(RateMonitor::new()), sink);
    app.load(file)?;

    enable_raw_mode()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let runner = Runner::new(source, FixedTicker::new(Duration::from_millis(TICK_RATE_MS)));
    let result = start_tui(&mut terminal, &mut app, &runner);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn start_tui<B: Backend, E: AppEventSource, T: Ticker>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    runner: &Runner<E, T>,
) -> Result<(), Box<dyn Error>> {
    loop {
        terminal.draw(|f| ui::draw(app, f))?;

        match runner.step() {
            AppEvent::Key(key) => {
                if app.on_key(key) == Flow::Quit {
                    break;
                }
            }
            AppEvent::Alert(alert) => app.on_alert(alert, Instant::now()),
            AppEvent::Tick => app.on_tick(Instant::now()),
            AppEvent::Resize => {}
        }
    }

    Ok(())
}
