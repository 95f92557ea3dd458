use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GridError;

/// Load-percentage thresholds shared by status tiers and the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Below this percentage of capacity active DERs are stood down.
    pub low_pct: f32,
    /// Above this percentage a feeder is critical.
    pub high_pct: f32,
    /// Ceiling for the simulated demand, as a percentage of capacity.
    pub load_ceiling_pct: f32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            low_pct: 75.0,
            high_pct: 90.0,
            load_ceiling_pct: 105.0,
        }
    }
}

/// Live health tier derived from `current_load / capacity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Normal,
    Warning,
    Critical,
}

impl LoadStatus {
    /// Classifies a load percentage: `> high` critical, `> low` warning.
    pub fn classify(load_pct: f32, thresholds: &Thresholds) -> Self {
        if load_pct > thresholds.high_pct {
            Self::Critical
        } else if load_pct > thresholds.low_pct {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static priority tag, independent of the live status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

/// A distribution feeder with fluctuating demand and DER mitigation.
///
/// Load convention:
/// - `target_load_kw` is the simulated demand after the random walk
/// - `current_load_kw = max(0, target_load_kw - active_der_contribution_kw)`
#[derive(Debug, Clone)]
pub struct Feeder {
    id: String,
    name: String,
    substation_name: String,
    criticality: Criticality,
    connected_ders: u32,
    capacity_kw: f32,
    base_load_kw: f32,
    target_load_kw: f32,
    variance_kw: f32,
    active_der_contribution_kw: f32,
}

impl Feeder {
    /// Creates a feeder whose demand starts at its base load.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidFeeder` if `capacity_kw` is not a positive
    /// finite number or `base_load_kw` is negative or non-finite.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        substation_name: impl Into<String>,
        base_load_kw: f32,
        capacity_kw: f32,
    ) -> Result<Self, GridError> {
        let id = id.into();
        if !capacity_kw.is_finite() || capacity_kw <= 0.0 {
            return Err(GridError::InvalidFeeder {
                feeder: id,
                reason: format!("capacity must be > 0, got {capacity_kw}"),
            });
        }
        if !base_load_kw.is_finite() || base_load_kw < 0.0 {
            return Err(GridError::InvalidFeeder {
                feeder: id,
                reason: format!("base load must be >= 0, got {base_load_kw}"),
            });
        }

        Ok(Self {
            id,
            name: name.into(),
            substation_name: substation_name.into(),
            criticality: Criticality::Medium,
            connected_ders: 0,
            capacity_kw,
            base_load_kw,
            target_load_kw: base_load_kw,
            variance_kw: 0.0,
            active_der_contribution_kw: 0.0,
        })
    }

    /// Sets the static priority tag.
    pub fn with_criticality(mut self, criticality: Criticality) -> Self {
        self.criticality = criticality;
        self
    }

    /// Sets the number of DERs physically connected to the feeder.
    pub fn with_connected_ders(mut self, connected_ders: u32) -> Self {
        self.connected_ders = connected_ders;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn substation_name(&self) -> &str {
        &self.substation_name
    }

    pub fn criticality(&self) -> Criticality {
        self.criticality
    }

    pub fn connected_ders(&self) -> u32 {
        self.connected_ders
    }

    pub fn capacity_kw(&self) -> f32 {
        self.capacity_kw
    }

    /// Nominal demand the random walk fluctuates around.
    pub fn base_load_kw(&self) -> f32 {
        self.base_load_kw
    }

    /// Simulated demand before DER mitigation.
    pub fn target_load_kw(&self) -> f32 {
        self.target_load_kw
    }

    /// Current random-walk offset from the base load.
    pub fn variance_kw(&self) -> f32 {
        self.variance_kw
    }

    /// Sum of outputs of DERs currently mitigating this feeder.
    pub fn active_der_contribution_kw(&self) -> f32 {
        self.active_der_contribution_kw
    }

    /// Net load after DER mitigation, never negative.
    pub fn current_load_kw(&self) -> f32 {
        (self.target_load_kw - self.active_der_contribution_kw).max(0.0)
    }

    /// Current load as a percentage of capacity.
    pub fn load_pct(&self) -> f32 {
        self.current_load_kw() / self.capacity_kw * 100.0
    }

    /// Status tier, recomputed from the current load on every call.
    pub fn status(&self, thresholds: &Thresholds) -> LoadStatus {
        LoadStatus::classify(self.load_pct(), thresholds)
    }

    /// Upper bound for simulated demand.
    pub fn load_ceiling_kw(&self, thresholds: &Thresholds) -> f32 {
        self.capacity_kw * thresholds.load_ceiling_pct / 100.0
    }

    /// Stores the random-walk result: new variance and clamped demand.
    pub fn apply_walk(&mut self, variance_kw: f32, thresholds: &Thresholds) {
        self.variance_kw = variance_kw;
        self.target_load_kw =
            (self.base_load_kw + variance_kw).clamp(0.0, self.load_ceiling_kw(thresholds));
    }

    /// Overrides the simulated demand directly, clamped like a walk step.
    pub fn set_target_load_kw(&mut self, kw: f32, thresholds: &Thresholds) {
        self.variance_kw = kw - self.base_load_kw;
        self.target_load_kw = kw.clamp(0.0, self.load_ceiling_kw(thresholds));
    }

    pub(crate) fn set_active_der_contribution_kw(&mut self, kw: f32) {
        self.active_der_contribution_kw = kw.max(0.0);
    }
}
