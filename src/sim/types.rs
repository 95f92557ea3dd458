//! Records produced by a headless run: per-tick telemetry and event lines.

use std::fmt;

use serde::Serialize;

use crate::grid::feeder::LoadStatus;

/// One feeder's state right after a load tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRow {
    /// Virtual time of the tick (ms since start).
    pub time_ms: u64,
    /// Load-walk cycle number.
    pub cycle: u64,
    pub feeder_id: String,
    pub target_kw: f32,
    /// `target_kw` minus DER contribution, floored at zero.
    pub current_kw: f32,
    pub load_pct: f32,
    pub status: LoadStatus,
    pub active_ders: usize,
    pub der_contribution_kw: f32,
    pub pending: bool,
}

/// What happened at a run event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Critical feeder flagged for operator confirmation.
    Flagged,
    /// Stale flag dropped because the feeder recovered.
    Cleared,
    /// DERs released because the feeder fell below the low threshold.
    StoodDown,
    /// A DER was activated for the feeder.
    Activated,
    /// A confirm could not activate any DER.
    JourneyFailed,
    /// The control loop could not evaluate the feeder.
    EvaluationError,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flagged => "flagged",
            Self::Cleared => "cleared",
            Self::StoodDown => "stood-down",
            Self::Activated => "activated",
            Self::JourneyFailed => "journey-failed",
            Self::EvaluationError => "eval-error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One line of the run's event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunEvent {
    pub time_ms: u64,
    pub kind: EventKind,
    pub feeder_id: String,
    pub detail: String,
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>7.1}s] {:<14} {:<8} {}",
            self.time_ms as f64 / 1000.0,
            self.kind,
            self.feeder_id,
            self.detail
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_line_format() {
        let ev = RunEvent {
            time_ms: 15_000,
            kind: EventKind::Flagged,
            feeder_id: "F-1234".to_string(),
            detail: "load 92.1%".to_string(),
        };
        assert_eq!(ev.to_string(), "[   15.0s] flagged        F-1234   load 92.1%");
    }
}
