//! TUI layout and widget rendering.

use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};

use super::runtime::App;
use super::style;

/// Width of the load bar column.
const BAR_WIDTH: usize = 20;

/// Renders the full TUI frame.
pub fn render(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),  // header
            Constraint::Min(10),    // feeders + side panels
            Constraint::Length(10), // event log + audit
            Constraint::Length(1),  // footer
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let middle = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(60), Constraint::Length(42)])
        .split(chunks[1]);
    render_feeders(frame, app, middle[0]);
    render_side(frame, app, middle[1]);

    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[2]);
    render_events(frame, app, bottom[0]);
    render_audit(frame, app, bottom[1]);

    render_footer(frame, app, chunks[3]);
}

/// Header bar: preset, virtual time, speed, run state.
fn render_header(frame: &mut Frame, app: &App, area: Rect) {
    let (icon, label) = if app.paused {
        ("‖", "PAUSED")
    } else {
        ("▶", "RUNNING")
    };

    let header = Line::from(vec![
        Span::styled(
            " GRID COMMAND CENTER ",
            Style::default()
                .fg(style::HEADER_FG)
                .bg(style::HEADER_BG)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(
            &app.preset_name,
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!(
            " │ t={:.0}s │ {}× │ {icon} {label} ",
            app.virtual_ms as f64 / 1000.0,
            app.speed(),
        )),
    ]);
    frame.render_widget(Paragraph::new(header), area);
}

/// Feeder table with load bars and status colours.
fn render_feeders(frame: &mut Frame, app: &App, area: Rect) {
    let rows: Vec<Row> = app
        .feeders()
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let color = style::status_color(f.status);
            let flag = if f.pending_auto_activation { "⚑" } else { "" };
            let row = Row::new(vec![
                Cell::from(f.id.clone()),
                Cell::from(f.substation_name.clone()),
                Cell::from(Span::styled(
                    style::load_bar(f.load_percent, BAR_WIDTH),
                    Style::default().fg(color),
                )),
                Cell::from(Span::styled(
                    format!("{:>5.1}%", f.load_percent),
                    Style::default().fg(color).add_modifier(Modifier::BOLD),
                )),
                Cell::from(format!("{:>5.1}/{:<5.1}", f.current_load, f.capacity)),
                Cell::from(Span::styled(
                    format!("{} ({:.1})", f.active_ders.len(), f.active_der_contribution),
                    Style::default().fg(style::DER_COLOR),
                )),
                Cell::from(Span::styled(flag, Style::default().fg(style::PENDING))),
            ]);
            if i == app.selected {
                row.style(Style::default().bg(style::SELECTED_BG))
            } else {
                row
            }
        })
        .collect();

    let header = Row::new(vec!["Feeder", "Substation", "Load", "%", "kW", "DERs", ""])
        .style(Style::default().add_modifier(Modifier::BOLD));

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Min(12),
            Constraint::Length(BAR_WIDTH as u16),
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(2),
        ],
    )
    .header(header)
    .block(Block::default().title(" Feeders ").borders(Borders::ALL));

    frame.render_widget(table, area);
}

/// Pending requests above active DERs.
fn render_side(frame: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let pending = app.pending();
    let lines: Vec<Line> = if pending.is_empty() {
        vec![Line::from("  none")]
    } else {
        pending
            .iter()
            .map(|p| {
                Line::from(Span::styled(
                    format!("  {} at {:.1}%", p.feeder_id, p.load_percent),
                    Style::default().fg(style::PENDING),
                ))
            })
            .collect()
    };
    let block = Block::default()
        .title(" Pending Requests ")
        .borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), chunks[0]);

    let feeders = app.feeders();
    let mut lines: Vec<Line> = feeders
        .iter()
        .flat_map(|f| f.active_ders.iter())
        .map(|d| {
            Line::from(format!(
                "  {:<14} {:<7} {:>5.1} kW",
                d.der_id, d.feeder_id, d.output_kw
            ))
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from("  none"));
    }
    let block = Block::default().title(" Active DERs ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), chunks[1]);
}

/// Tail of the engine's event log.
fn render_events(frame: &mut Frame, app: &App, area: Rect) {
    let visible = usize::from(area.height.saturating_sub(2));
    let events = app.recent_events();
    let lines: Vec<Line> = events[events.len().saturating_sub(visible)..]
        .iter()
        .map(|e| {
            Line::from(Span::styled(
                e.to_string(),
                Style::default().fg(style::event_color(e.kind)),
            ))
        })
        .collect();
    let block = Block::default().title(" Events ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Newest audit entries first.
fn render_audit(frame: &mut Frame, app: &App, area: Rect) {
    let visible = usize::from(area.height.saturating_sub(2));
    let lines: Vec<Line> = app
        .audit_tail(visible)
        .into_iter()
        .map(|a| {
            Line::from(vec![
                Span::raw(format!("{} ", a.timestamp.format("%H:%M:%S"))),
                Span::styled(
                    format!("{:<24}", a.action),
                    Style::default().fg(style::audit_color(a.status)),
                ),
                Span::raw(a.target),
            ])
        })
        .collect();
    let block = Block::default().title(" Audit ").borders(Borders::ALL);
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

/// Footer with keybinding hints and the last action's result.
fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
    let footer = Paragraph::new(Line::from(vec![
        Span::styled(
            " q:Quit  Space:Pause  +/-:Speed  ↑/↓:Select  c:Confirm  d:Dismiss  s:Stand down  1/2:Preset  r:Restart │ ",
            Style::default().fg(style::FOOTER_FG),
        ),
        Span::raw(&app.status_line),
    ]));
    frame.render_widget(footer, area);
}
