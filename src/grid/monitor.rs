//! Periodic auto-activation / auto-deactivation scan.
//!
//! The scan is level-triggered: every call re-evaluates the full state of
//! every feeder. A failure on one feeder is logged and recorded in the
//! report without stopping the remaining feeders.

use serde::Serialize;
use tracing::{info, warn};

use super::feeder::Thresholds;
use super::registry::ActiveDer;
use super::state::GridState;
use crate::error::GridError;

/// Control-loop view of one feeder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeederPhase {
    /// No action needed.
    Normal,
    /// DERs active and load acceptable.
    Mitigating,
    /// DERs active and load below the low threshold: stand down.
    OverMitigated,
    /// Critical with no DERs and no flag: raise the flag.
    CriticalUnmitigated,
    /// Flag already raised, waiting for an operator.
    CriticalPending,
}

/// Maps load, mitigation and flag state to a phase.
pub fn classify(
    load_pct: f32,
    active_ders: usize,
    pending: bool,
    thresholds: &Thresholds,
) -> FeederPhase {
    if load_pct < thresholds.low_pct && active_ders > 0 {
        FeederPhase::OverMitigated
    } else if load_pct > thresholds.high_pct && active_ders == 0 {
        if pending {
            FeederPhase::CriticalPending
        } else {
            FeederPhase::CriticalUnmitigated
        }
    } else if active_ders > 0 {
        FeederPhase::Mitigating
    } else {
        FeederPhase::Normal
    }
}

/// DERs released for one feeder by a stand-down.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StandDown {
    pub feeder_id: String,
    pub load_percent: f32,
    pub released: Vec<ActiveDer>,
}

/// Everything one scan changed.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub stood_down: Vec<StandDown>,
    /// Feeders newly flagged for operator confirmation.
    pub flagged: Vec<String>,
    /// Feeders whose stale flag was cleared because they are no longer critical.
    pub cleared: Vec<String>,
    pub errors: Vec<GridError>,
}

impl ScanReport {
    /// `true` when the scan changed nothing and hit no errors.
    pub fn is_quiet(&self) -> bool {
        self.stood_down.is_empty()
            && self.flagged.is_empty()
            && self.cleared.is_empty()
            && self.errors.is_empty()
    }
}

enum Decision {
    None,
    StandDown(StandDown),
    Flagged,
    Cleared,
}

/// Evaluates every feeder once and applies the resulting transitions.
pub fn scan(state: &mut GridState) -> ScanReport {
    let ids: Vec<String> = state.feeders().iter().map(|f| f.id().to_string()).collect();
    let mut report = ScanReport::default();

    for id in ids {
        match evaluate_feeder(state, &id) {
            Ok(Decision::None) => {}
            Ok(Decision::StandDown(sd)) => report.stood_down.push(sd),
            Ok(Decision::Flagged) => report.flagged.push(id),
            Ok(Decision::Cleared) => report.cleared.push(id),
            Err(err) => {
                warn!(feeder = %id, error = %err, "feeder evaluation failed");
                report.errors.push(err);
            }
        }
    }

    report
}

/// Returns the phase a feeder is in right now without changing anything.
///
/// # Errors
///
/// Returns `GridError::FeederNotFound` for an unknown id, or
/// `GridError::Evaluation` if the load is not a finite number.
pub fn phase_of(state: &GridState, feeder_id: &str) -> Result<FeederPhase, GridError> {
    let load_pct = checked_load_pct(state, feeder_id)?;
    Ok(classify(
        load_pct,
        state.registry().count_for(feeder_id),
        state.is_pending(feeder_id),
        state.thresholds(),
    ))
}

fn checked_load_pct(state: &GridState, feeder_id: &str) -> Result<f32, GridError> {
    let load_pct = state.feeder(feeder_id)?.load_pct();
    if !load_pct.is_finite() {
        return Err(GridError::Evaluation {
            feeder: feeder_id.to_string(),
            reason: format!("load percentage is {load_pct}"),
        });
    }
    Ok(load_pct)
}

fn evaluate_feeder(state: &mut GridState, feeder_id: &str) -> Result<Decision, GridError> {
    let load_pct = checked_load_pct(state, feeder_id)?;
    let phase = classify(
        load_pct,
        state.registry().count_for(feeder_id),
        state.is_pending(feeder_id),
        state.thresholds(),
    );

    match phase {
        FeederPhase::OverMitigated => {
            let released = state.deactivate_feeder(feeder_id)?;
            info!(
                feeder = %feeder_id,
                load_pct,
                released = released.len(),
                "load below low threshold, standing down DERs"
            );
            Ok(Decision::StandDown(StandDown {
                feeder_id: feeder_id.to_string(),
                load_percent: load_pct,
                released,
            }))
        }
        FeederPhase::CriticalUnmitigated => {
            state.flag_pending(feeder_id);
            info!(
                feeder = %feeder_id,
                load_pct,
                "critical and unmitigated, awaiting confirmation"
            );
            Ok(Decision::Flagged)
        }
        FeederPhase::Normal | FeederPhase::Mitigating
            if state.is_pending(feeder_id) && load_pct <= state.thresholds().high_pct =>
        {
            state.clear_pending(feeder_id);
            info!(feeder = %feeder_id, "no longer critical, clearing pending request");
            Ok(Decision::Cleared)
        }
        _ => Ok(Decision::None),
    }
}
