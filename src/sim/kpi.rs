//! Post-hoc summary of a headless run.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use super::types::{EventKind, RunEvent, TelemetryRow};
use crate::grid::feeder::LoadStatus;

/// Aggregate indicators derived from a complete run.
///
/// Computed post-hoc from the telemetry rows and the event log so the
/// summary always agrees with the exported data.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Load ticks observed.
    pub load_ticks: usize,
    /// Highest load percentage seen on any feeder.
    pub peak_load_pct: f32,
    /// Feeder that reached `peak_load_pct`.
    pub peak_feeder: Option<String>,
    /// Feeder-ticks spent critical.
    pub critical_ticks: usize,
    /// Feeder-ticks spent in warning.
    pub warning_ticks: usize,
    /// DERs activated.
    pub activations: usize,
    /// Feeders stood down by the control loop.
    pub stand_downs: usize,
    /// Auto-activation requests raised.
    pub flags: usize,
    /// Confirms that activated nothing.
    pub failed_journeys: usize,
}

impl RunSummary {
    /// Computes the summary.
    ///
    /// # Arguments
    ///
    /// * `rows` - Per-feeder telemetry, one row per feeder per load tick
    /// * `events` - Event log of the run
    pub fn from_run(rows: &[TelemetryRow], events: &[RunEvent]) -> Self {
        let mut summary = Self::default();
        let mut ticks = BTreeSet::new();

        for r in rows {
            ticks.insert(r.time_ms);
            match r.status {
                LoadStatus::Critical => summary.critical_ticks += 1,
                LoadStatus::Warning => summary.warning_ticks += 1,
                LoadStatus::Normal => {}
            }
            if summary.peak_feeder.is_none() || r.load_pct > summary.peak_load_pct {
                summary.peak_load_pct = r.load_pct;
                summary.peak_feeder = Some(r.feeder_id.clone());
            }
        }
        summary.load_ticks = ticks.len();

        for e in events {
            match e.kind {
                EventKind::Activated => summary.activations += 1,
                EventKind::StoodDown => summary.stand_downs += 1,
                EventKind::Flagged => summary.flags += 1,
                EventKind::JourneyFailed => summary.failed_journeys += 1,
                EventKind::Cleared | EventKind::EvaluationError => {}
            }
        }

        summary
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "--- Run Summary ---")?;
        writeln!(f, "Load ticks:            {}", self.load_ticks)?;
        writeln!(
            f,
            "Peak load:             {:.1}% ({})",
            self.peak_load_pct,
            self.peak_feeder.as_deref().unwrap_or("-")
        )?;
        writeln!(f, "Critical feeder-ticks: {}", self.critical_ticks)?;
        writeln!(f, "Warning feeder-ticks:  {}", self.warning_ticks)?;
        writeln!(f, "Activation requests:   {}", self.flags)?;
        writeln!(f, "DERs activated:        {}", self.activations)?;
        writeln!(f, "Stand-downs:           {}", self.stand_downs)?;
        write!(f, "Failed journeys:       {}", self.failed_journeys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(time_ms: u64, feeder: &str, load_pct: f32, status: LoadStatus) -> TelemetryRow {
        TelemetryRow {
            time_ms,
            cycle: time_ms / 3000,
            feeder_id: feeder.to_string(),
            target_kw: load_pct,
            current_kw: load_pct,
            load_pct,
            status,
            active_ders: 0,
            der_contribution_kw: 0.0,
            pending: false,
        }
    }

    fn event(kind: EventKind) -> RunEvent {
        RunEvent {
            time_ms: 5000,
            kind,
            feeder_id: "F-1".to_string(),
            detail: String::new(),
        }
    }

    #[test]
    fn status_counts_and_peak() {
        let rows = vec![
            row(3000, "F-1", 92.0, LoadStatus::Critical),
            row(3000, "F-2", 80.0, LoadStatus::Warning),
            row(6000, "F-1", 95.5, LoadStatus::Critical),
            row(6000, "F-2", 70.0, LoadStatus::Normal),
        ];
        let s = RunSummary::from_run(&rows, &[]);
        assert_eq!(s.load_ticks, 2);
        assert_eq!(s.critical_ticks, 2);
        assert_eq!(s.warning_ticks, 1);
        assert_eq!(s.peak_load_pct, 95.5);
        assert_eq!(s.peak_feeder.as_deref(), Some("F-1"));
    }

    #[test]
    fn event_counts() {
        let events = vec![
            event(EventKind::Flagged),
            event(EventKind::Activated),
            event(EventKind::Activated),
            event(EventKind::StoodDown),
            event(EventKind::JourneyFailed),
            event(EventKind::Cleared),
        ];
        let s = RunSummary::from_run(&[], &events);
        assert_eq!(s.flags, 1);
        assert_eq!(s.activations, 2);
        assert_eq!(s.stand_downs, 1);
        assert_eq!(s.failed_journeys, 1);
    }

    #[test]
    fn empty_run() {
        let s = RunSummary::from_run(&[], &[]);
        assert_eq!(s, RunSummary::default());
        assert!(s.to_string().contains("Peak load:             0.0% (-)"));
    }
}
