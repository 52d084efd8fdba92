mod state;
mod theme;
mod ui;

use anyhow::{Context, Result};
use beads_core::resolve_beads_path;
use beads_dash::{Worker, WorkerConfig};
use clap::Parser;
use crossbeam_channel::TryRecvError;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use state::{Action, App};
use std::{
    fs::OpenOptions,
    io,
    path::PathBuf,
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const ENV_LOG_LEVEL: &str = "BEADS_DASH_LOG_LEVEL";
const ENV_LOG_FILE: &str = "BEADS_DASH_LOG_FILE";

#[derive(Parser, Debug)]
#[command(name = "beads-dash", about = "Live terminal dashboard for a beads issue file")]
struct Cli {
    /// Issues JSONL file. Defaults to the nearest `.beads` directory.
    #[arg(long)]
    path: Option<PathBuf>,
    /// Quiet period before a file change triggers a reload.
    #[arg(long)]
    debounce_ms: Option<u64>,
    /// Write tracing output here instead of discarding it.
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Only refresh on `r`/`R`.
    #[arg(long, default_value_t = false)]
    no_watch: bool,
    /// Poll the file instead of relying on native change notifications.
    #[arg(long, default_value_t = false)]
    poll: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.clone());

    let path = match cli.path {
        Some(path) => path,
        None => {
            let cwd = std::env::current_dir().context("reading current directory")?;
            resolve_beads_path(&cwd).context("locating beads issues file")?
        }
    };

    let mut config = WorkerConfig::from_env(&path);
    if let Some(ms) = cli.debounce_ms {
        config.debounce_delay = Duration::from_millis(ms);
    }
    config.watch = !cli.no_watch;
    if cli.poll {
        config.force_poll = true;
    }

    let worker = Worker::new(config).context("invalid worker configuration")?;
    worker.start().context("starting background worker")?;
    worker.trigger_refresh();
    info!(event = "dashboard_start", path = %path.display());

    let mut app = App::new(path);
    let mut terminal = setup_terminal()?;
    let result = run_app(&mut terminal, &mut app, &worker);
    restore_terminal(&mut terminal)?;
    worker.stop();

    if let Err(err) = result {
        eprintln!("beads-dash: {err}");
    }

    Ok(())
}

fn init_logging(log_file: Option<PathBuf>) {
    let level = std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let log_file = log_file.or_else(|| std::env::var_os(ENV_LOG_FILE).map(PathBuf::from));

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(err) => {
                eprintln!("log_file_error: {}: {err}", path.display());
                None
            }
        }
    });

    // The terminal belongs to the UI; without a file, tracing output is dropped.
    match file {
        Some(file) => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::sink)
                .try_init();
        }
    }
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    worker: &Worker,
) -> Result<()> {
    let tick_rate = Duration::from_millis(500);
    let input_poll = Duration::from_millis(100);
    let messages = worker.messages();
    let mut worker_gone = false;
    let mut last_tick = Instant::now();

    loop {
        if app.dirty {
            terminal.draw(|f| ui::render(f, app))?;
        }

        if event::poll(input_poll)? {
            match event::read()? {
                Event::Key(key) => {
                    if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) {
                        match app.handle_key(key) {
                            Some(Action::Refresh) => worker.trigger_refresh(),
                            Some(Action::ForceRefresh) => worker.force_refresh(),
                            None => {}
                        }
                    }
                }
                Event::Resize(_, _) => {
                    app.mark_dirty();
                }
                _ => {}
            }
        }

        while !worker_gone {
            match messages.try_recv() {
                Ok(message) => app.apply_message(message),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!(event = "worker_disconnected");
                    app.on_worker_stopped();
                    worker_gone = true;
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            app.on_tick(worker.health().recovery_count);
            last_tick = Instant::now();
        }

        if app.should_quit() {
            break;
        }
    }

    Ok(())
}
