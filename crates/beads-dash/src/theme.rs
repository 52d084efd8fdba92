use beads_core::IssueStatus;
use ratatui::style::{Color, Modifier, Style};

pub const HEADER_STYLE: Style = Style::new()
    .fg(Color::Rgb(142, 192, 124))
    .add_modifier(Modifier::BOLD);
pub const SELECTED_STYLE: Style = Style::new()
    .bg(Color::Rgb(131, 165, 152))
    .fg(Color::Black)
    .add_modifier(Modifier::BOLD);
pub const MUTED: Color = Color::Rgb(146, 131, 116);
pub const WARNING: Color = Color::Rgb(250, 189, 47);
pub const FATAL: Color = Color::Rgb(251, 73, 52);

pub fn zebra_row_style(index: usize) -> Style {
    let bg = if index % 2 == 0 {
        Color::Rgb(18, 20, 26)
    } else {
        Color::Rgb(24, 27, 34)
    };
    Style::new().bg(bg)
}

/// Stable color per issue type, so "bug" always reads the same.
pub fn type_badge_style(issue_type: &str) -> Style {
    let palette = [
        Color::Rgb(131, 165, 152),
        Color::Rgb(69, 133, 136),
        Color::Rgb(142, 192, 124),
        Color::Rgb(184, 187, 38),
        Color::Rgb(250, 189, 47),
        Color::Rgb(254, 128, 25),
        Color::Rgb(211, 134, 155),
        Color::Rgb(189, 174, 147),
    ];
    let mut hash: u64 = 1469598103934665603;
    for b in issue_type.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    let color = palette[(hash as usize) % palette.len()];
    Style::new().fg(color).add_modifier(Modifier::BOLD)
}

pub mod icons {
    pub const CLOSED: &str = "x";
    pub const OPEN: &str = ".";
    pub const READY: &str = "o";
    pub const IN_PROGRESS: &str = ">";
    pub const BLOCKED: &str = "!";
    pub const DEFERRED: &str = "z";
    pub const PRIORITY_HIGH: &str = "!";
    pub const PRIORITY_MED: &str = "~";
    pub const PRIORITY_LOW: &str = "-";
}

pub fn status_icon(status: &IssueStatus, ready: bool) -> &'static str {
    match status {
        IssueStatus::Closed | IssueStatus::Tombstone => icons::CLOSED,
        IssueStatus::InProgress => icons::IN_PROGRESS,
        IssueStatus::Blocked => icons::BLOCKED,
        IssueStatus::Deferred => icons::DEFERRED,
        IssueStatus::Open if ready => icons::READY,
        IssueStatus::Open | IssueStatus::Unknown => icons::OPEN,
    }
}

pub fn status_color(status: &IssueStatus) -> Color {
    match status {
        IssueStatus::Closed => Color::Rgb(184, 187, 38),
        IssueStatus::InProgress => Color::Rgb(131, 165, 152),
        IssueStatus::Blocked => Color::Rgb(254, 128, 25),
        IssueStatus::Deferred => Color::Rgb(250, 189, 47),
        IssueStatus::Tombstone => Color::Rgb(214, 93, 14),
        IssueStatus::Open | IssueStatus::Unknown => MUTED,
    }
}

pub fn priority_icon(priority: i32) -> &'static str {
    match priority {
        0 | 1 => icons::PRIORITY_HIGH,
        2 => icons::PRIORITY_MED,
        _ => icons::PRIORITY_LOW,
    }
}

pub fn priority_color(priority: i32) -> Color {
    match priority {
        0 | 1 => Color::Rgb(254, 128, 25),
        2 => Color::Rgb(250, 189, 47),
        3 | 4 => Color::Rgb(131, 165, 152),
        _ => MUTED,
    }
}
