use crate::state::{App, Notice, ViewMode};
use crate::theme;
use beads_dash::{DatasetTier, Snapshot};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, Wrap},
    Frame,
};

pub fn render(f: &mut Frame, app: &mut App) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(f.size());
    let body = outer[0];

    if app.show_help || app.show_detail {
        let main = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(body);
        render_main(f, app, main[0]);
        if app.show_help {
            render_help(f, main[1]);
        } else {
            render_details(f, app, main[1]);
        }
    } else {
        render_main(f, app, body);
    }

    render_footer(f, app, outer[1]);
    app.dirty = false;
}

fn render_help(f: &mut Frame, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Help")
        .border_style(Style::default().fg(Color::Yellow));
    let inner_area = block.inner(area);
    f.render_widget(block, area);

    let key = |keys: &'static str, label: &'static str| {
        Line::from(vec![
            Span::styled(format!("{keys:<11}"), Style::default().fg(Color::Cyan)),
            Span::raw(label),
        ])
    };
    let text = vec![
        Line::from(Span::styled(
            "Keyboard Shortcuts",
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        key("j / Down", "Next issue"),
        key("k / Up", "Previous issue"),
        key("Enter", "Toggle details pane"),
        key("b", "Toggle list/board"),
        key("r", "Refresh"),
        key("R", "Force rebuild"),
        key("?", "Toggle help"),
        key("q", "Quit"),
    ];

    let p = Paragraph::new(text).wrap(Wrap { trim: true });
    f.render_widget(p, inner_area);
}

fn render_main(f: &mut Frame, app: &mut App, area: Rect) {
    let Some(snapshot) = app.snapshot.clone() else {
        render_empty(f, app, area);
        return;
    };
    match app.view {
        ViewMode::List => render_list(f, app, &snapshot, area),
        ViewMode::Board => render_board(f, &snapshot, area),
    }
}

fn render_empty(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Issues")
        .border_style(Style::default().fg(Color::Cyan));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let message = match &app.notice {
        Some(notice) => notice.text().to_string(),
        None => "Loading issues...".to_string(),
    };
    let text = vec![
        Line::from(Span::styled(message, Style::default().fg(theme::WARNING))),
        Line::from(""),
        Line::from(format!("path: {}", app.path.display())),
        Line::from(""),
        Line::from("Press r to retry, q to quit."),
    ];
    let p = Paragraph::new(text).wrap(Wrap { trim: true });
    f.render_widget(p, inner);
}

fn render_list(f: &mut Frame, app: &mut App, snapshot: &Snapshot, area: Rect) {
    let rows: Vec<Row> = snapshot
        .rows
        .iter()
        .enumerate()
        .map(|(visual_idx, row)| {
            let status = Span::styled(
                theme::status_icon(&row.status, row.ready),
                Style::default().fg(theme::status_color(&row.status)),
            );
            let priority = Span::styled(
                theme::priority_icon(row.priority),
                Style::default().fg(theme::priority_color(row.priority)),
            );
            let mut title_spans = Vec::new();
            if row.blocked_by > 0 {
                let plural = if row.blocked_by == 1 { "" } else { "s" };
                title_spans.push(Span::styled(
                    format!("[{} blocker{plural}] ", row.blocked_by),
                    Style::default().fg(theme::status_color(&beads_core::IssueStatus::Blocked)),
                ));
            }
            title_spans.push(Span::raw(row.title.as_str()));

            Row::new(vec![
                Cell::from(Span::raw(row.id.as_str())),
                Cell::from(Span::styled(
                    row.issue_type.as_str(),
                    theme::type_badge_style(&row.issue_type),
                )),
                Cell::from(status),
                Cell::from(priority),
                Cell::from(Line::from(title_spans)),
                Cell::from(Span::styled(row.assignee.as_str(), Style::default().fg(theme::MUTED))),
            ])
            .style(theme::zebra_row_style(visual_idx))
        })
        .collect();

    let widths = [
        Constraint::Length(12),
        Constraint::Length(8),
        Constraint::Length(2),
        Constraint::Length(2),
        Constraint::Min(10),
        Constraint::Length(12),
    ];

    let table = Table::new(rows, widths)
        .header(
            Row::new(vec!["ID", "Type", "S", "P", "Title", "Assignee"]).style(theme::HEADER_STYLE),
        )
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Issues ({})", snapshot.counts.total))
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .highlight_style(theme::SELECTED_STYLE);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_board(f: &mut Frame, snapshot: &Snapshot, area: Rect) {
    let constraints: Vec<Constraint> = snapshot
        .board
        .iter()
        .map(|_| Constraint::Ratio(1, snapshot.board.len().max(1) as u32))
        .collect();
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(constraints)
        .split(area);

    for (column, slot) in snapshot.board.iter().zip(columns.iter()) {
        let items: Vec<ListItem> = column
            .rows
            .iter()
            .filter_map(|idx| snapshot.rows.get(*idx))
            .map(|row| {
                ListItem::new(Line::from(vec![
                    Span::styled(
                        format!("{} ", theme::priority_icon(row.priority)),
                        Style::default().fg(theme::priority_color(row.priority)),
                    ),
                    Span::raw(row.title.as_str()),
                ]))
            })
            .collect();
        let list = List::new(items).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("{} ({})", column.title, column.rows.len())),
        );
        f.render_widget(list, *slot);
    }
}

fn render_details(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title("Details")
        .border_style(Style::default().fg(Color::Cyan));
    let inner_area = block.inner(area);
    f.render_widget(block, area);

    let Some(issue) = app
        .selected_id()
        .and_then(|id| app.snapshot.as_ref().and_then(|s| s.get(id)))
    else {
        return;
    };

    let label = |text: &'static str| Span::styled(text, Style::default().fg(Color::DarkGray));
    let mut lines = vec![
        Line::from(vec![
            label("ID: "),
            Span::raw(issue.id.as_str()),
            Span::raw(" "),
            Span::styled(
                format!("[{}]", issue.status),
                Style::default().fg(theme::status_color(&issue.status)),
            ),
        ]),
        Line::from(Span::styled(
            issue.title.as_str(),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(vec![label("Priority: "), Span::raw(format!("P{}", issue.priority))]),
        Line::from(vec![label("Type: "), Span::raw(issue.issue_type.as_str())]),
    ];
    if !issue.assignee.is_empty() {
        lines.push(Line::from(vec![label("Assignee: "), Span::raw(issue.assignee.as_str())]));
    }
    if let Some(created) = issue.created_at {
        lines.push(Line::from(vec![
            label("Created: "),
            Span::raw(created.format("%Y-%m-%d %H:%M").to_string()),
        ]));
    }
    if !issue.labels.is_empty() {
        lines.push(Line::from(vec![label("Labels: "), Span::raw(issue.labels.join(", "))]));
    }

    for (heading, body) in [
        ("Description:", &issue.description),
        ("Design:", &issue.design),
        ("Acceptance:", &issue.acceptance_criteria),
        ("Notes:", &issue.notes),
    ] {
        if body.is_empty() {
            continue;
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(heading, Style::default().fg(Color::Blue))));
        lines.push(Line::from(body.as_str()));
    }

    if !issue.dependencies.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Dependencies:",
            Style::default().fg(Color::Yellow),
        )));
        for dep in &issue.dependencies {
            lines.push(Line::from(format!("- {} ({})", dep.depends_on_id, dep.dep_type.as_str())));
        }
    }

    let p = Paragraph::new(lines).wrap(Wrap { trim: true });
    f.render_widget(p, inner_area);
}

fn render_footer(f: &mut Frame, app: &App, area: Rect) {
    let mut spans = Vec::new();
    if let Some(snapshot) = &app.snapshot {
        let counts = snapshot.counts;
        spans.push(Span::raw(format!(
            " open {}  ready {}  blocked {}  closed {} ",
            counts.open, counts.ready, counts.blocked, counts.closed
        )));
        spans.push(Span::styled(
            format!(" v{} ", snapshot.version),
            Style::default().fg(theme::MUTED),
        ));
        if snapshot.tier != DatasetTier::Normal {
            if let Some(warning) = &snapshot.warning {
                spans.push(Span::styled(
                    format!(" {warning} "),
                    Style::default().fg(theme::WARNING),
                ));
            }
        }
        if snapshot.load_warning_count > 0 {
            spans.push(Span::styled(
                format!(" {} skipped lines ", snapshot.load_warning_count),
                Style::default().fg(theme::WARNING),
            ));
        }
    }
    if app.recovery_count > 0 {
        spans.push(Span::styled(
            format!(" recoveries {} ", app.recovery_count),
            Style::default().fg(theme::WARNING),
        ));
    }
    spans.push(Span::styled(
        format!(" [{}] ", app.view.label()),
        Style::default().fg(theme::MUTED),
    ));
    match &app.notice {
        Some(notice @ Notice::Fatal(_)) => {
            spans.push(Span::styled(
                format!(" {} ", notice.text()),
                Style::default().fg(theme::FATAL),
            ));
        }
        Some(notice) => {
            spans.push(Span::styled(
                format!(" {} ", notice.text()),
                Style::default().fg(theme::WARNING),
            ));
        }
        None => {}
    }
    f.render_widget(Paragraph::new(Line::from(spans)), area);
}
