use beads_dash::{Snapshot, WorkerMessage};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::widgets::TableState;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const NOTICE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewMode {
    #[default]
    List,
    Board,
}

impl ViewMode {
    pub fn label(self) -> &'static str {
        match self {
            ViewMode::List => "list",
            ViewMode::Board => "board",
        }
    }

    pub fn next(self) -> Self {
        match self {
            ViewMode::List => ViewMode::Board,
            ViewMode::Board => ViewMode::List,
        }
    }
}

/// Requests the UI hands back to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Refresh,
    ForceRefresh,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Transient { text: String, until: Instant },
    Fatal(String),
}

impl Notice {
    pub fn text(&self) -> &str {
        match self {
            Notice::Transient { text, .. } | Notice::Fatal(text) => text,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Notice::Fatal(_))
    }
}

pub struct App {
    pub path: PathBuf,
    pub snapshot: Option<Arc<Snapshot>>,
    pub table_state: TableState,
    pub view: ViewMode,
    pub show_help: bool,
    pub show_detail: bool,
    pub notice: Option<Notice>,
    pub recovery_count: u32,
    pub dirty: bool,
    should_quit: bool,
}

impl App {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            snapshot: None,
            table_state: TableState::default(),
            view: ViewMode::List,
            show_help: false,
            show_detail: false,
            notice: None,
            recovery_count: 0,
            dirty: true,
            should_quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn apply_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::SnapshotReady { snapshot, .. } => self.replace_snapshot(snapshot),
            WorkerMessage::SnapshotError { error, recoverable } => {
                if recoverable {
                    self.set_transient(format!("refresh failed: {error}"));
                } else {
                    self.notice = Some(Notice::Fatal(format!("{error}")));
                }
            }
        }
        self.mark_dirty();
    }

    /// The worker closed its message channel.
    pub fn on_worker_stopped(&mut self) {
        if !self.notice.as_ref().is_some_and(Notice::is_fatal) {
            self.notice = Some(Notice::Fatal(
                "background refresh stopped; showing last loaded data".to_string(),
            ));
            self.mark_dirty();
        }
    }

    pub fn on_tick(&mut self, recovery_count: u32) {
        if let Some(Notice::Transient { until, .. }) = &self.notice {
            if Instant::now() >= *until {
                self.notice = None;
                self.mark_dirty();
            }
        }
        if recovery_count != self.recovery_count {
            self.recovery_count = recovery_count;
            self.mark_dirty();
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
            }
            KeyCode::Esc => {
                if self.show_help {
                    self.show_help = false;
                } else if self.show_detail {
                    self.show_detail = false;
                }
            }
            KeyCode::Down | KeyCode::Char('j') => {
                self.move_selection(1);
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.move_selection(-1);
            }
            KeyCode::Char('r') => {
                self.set_transient("refreshing...".to_string());
                return Some(Action::Refresh);
            }
            KeyCode::Char('R') => {
                self.set_transient("forcing full rebuild...".to_string());
                return Some(Action::ForceRefresh);
            }
            KeyCode::Enter => {
                self.show_help = false;
                self.show_detail = !self.show_detail;
            }
            KeyCode::Char('b') => {
                self.view = self.view.next();
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
            }
            _ => {}
        }
        self.mark_dirty();
        None
    }

    pub fn row_count(&self) -> usize {
        self.snapshot.as_ref().map_or(0, |snapshot| snapshot.rows.len())
    }

    pub fn selected_id(&self) -> Option<&str> {
        let snapshot = self.snapshot.as_ref()?;
        let idx = self.table_state.selected()?;
        snapshot.rows.get(idx).map(|row| row.id.as_str())
    }

    fn replace_snapshot(&mut self, snapshot: Arc<Snapshot>) {
        let selected = self.selected_id().map(str::to_string);
        let restored = selected
            .as_deref()
            .and_then(|id| snapshot.rows.iter().position(|row| row.id == id));
        let fallback = (!snapshot.rows.is_empty())
            .then(|| self.table_state.selected().unwrap_or(0).min(snapshot.rows.len() - 1));
        self.table_state.select(restored.or(fallback));
        self.snapshot = Some(snapshot);
        if matches!(self.notice, Some(Notice::Transient { .. })) {
            self.notice = None;
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.row_count();
        if len == 0 {
            self.table_state.select(None);
            return;
        }
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).clamp(0, len as isize - 1);
        self.table_state.select(Some(next as usize));
    }

    fn set_transient(&mut self, text: String) {
        if self.notice.as_ref().is_some_and(Notice::is_fatal) {
            return;
        }
        self.notice = Some(Notice::Transient {
            text,
            until: Instant::now() + NOTICE_TTL,
        });
    }
}
