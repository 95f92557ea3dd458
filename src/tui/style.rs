//! Color constants and helpers for the TUI.

use ratatui::style::Color;

use crate::audit::AuditStatus;
use crate::grid::feeder::LoadStatus;
use crate::sim::types::EventKind;

/// Header bar foreground.
pub const HEADER_FG: Color = Color::White;
/// Header bar background.
pub const HEADER_BG: Color = Color::DarkGray;
/// Footer help text color.
pub const FOOTER_FG: Color = Color::DarkGray;
/// Highlight for the selected feeder row.
pub const SELECTED_BG: Color = Color::Rgb(40, 40, 60);
/// Pending-request marker.
pub const PENDING: Color = Color::Magenta;
/// DER contribution figures.
pub const DER_COLOR: Color = Color::Cyan;

/// Returns the color for a load status tier.
pub fn status_color(status: LoadStatus) -> Color {
    match status {
        LoadStatus::Normal => Color::Green,
        LoadStatus::Warning => Color::Yellow,
        LoadStatus::Critical => Color::Red,
    }
}

pub fn event_color(kind: EventKind) -> Color {
    match kind {
        EventKind::Flagged => PENDING,
        EventKind::Activated => DER_COLOR,
        EventKind::StoodDown | EventKind::Cleared => Color::Green,
        EventKind::JourneyFailed | EventKind::EvaluationError => Color::Red,
    }
}

pub fn audit_color(status: AuditStatus) -> Color {
    match status {
        AuditStatus::Success => Color::Green,
        AuditStatus::Error => Color::Red,
        AuditStatus::Info => Color::Gray,
    }
}

/// Text load bar of `width` cells, saturating at 100%.
pub fn load_bar(load_pct: f32, width: usize) -> String {
    let filled = ((load_pct / 100.0).clamp(0.0, 1.0) * width as f32).round() as usize;
    let mut bar = "█".repeat(filled);
    bar.push_str(&"·".repeat(width - filled));
    bar
}
