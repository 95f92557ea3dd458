//! TOML-based scenario configuration and preset definitions.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::beckn::gateway::MockGateway;
use crate::beckn::journey::{Compensation, JourneySettings};
use crate::beckn::types::{BapIdentity, FulfillmentType, Stage};
use crate::error::GridError;
use crate::grid::feeder::{Criticality, Feeder, Thresholds};
use crate::grid::load_walk::{LoadWalk, WalkParams};
use crate::grid::state::GridState;
use crate::service::ServiceSettings;

/// Top-level scenario configuration parsed from TOML.
///
/// Every section has defaults matching the `london` preset. Load from TOML
/// with [`ScenarioConfig::from_toml_file`] or pick a preset with
/// [`ScenarioConfig::from_preset`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Timer intervals and seed.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Status tiers and control-loop thresholds.
    #[serde(default)]
    pub thresholds: Thresholds,
    /// Random-walk constants.
    #[serde(default)]
    pub load_walk: WalkParams,
    /// Fulfillment journey behaviour.
    #[serde(default)]
    pub journey: JourneyConfig,
    /// Operator confirmation of pending requests.
    #[serde(default)]
    pub auto_activation: AutoActivationConfig,
    /// Network identity and sandbox fault injection.
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// The fixed feeder set.
    #[serde(default = "london_feeders")]
    pub feeders: Vec<FeederConfig>,
}

/// Timer intervals and seed.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Master random seed.
    pub seed: u64,
    /// Load-tick interval T1 (ms, must be > 0).
    pub load_tick_ms: u64,
    /// Control-loop scan interval T2 (ms, must be > `load_tick_ms`).
    pub monitor_interval_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            load_tick_ms: 3000,
            monitor_interval_ms: 5000,
        }
    }
}

/// Fulfillment journey behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JourneyConfig {
    pub fulfillment_type: FulfillmentType,
    /// Per-stage timeout (ms).
    pub stage_timeout_ms: u64,
    /// Delivery window requested at init (minutes).
    pub window_minutes: i64,
    pub compensation: Compensation,
}

impl Default for JourneyConfig {
    fn default() -> Self {
        Self {
            fulfillment_type: FulfillmentType::EnergyDispatch,
            stage_timeout_ms: 2000,
            window_minutes: 60,
            compensation: Compensation::Cancel,
        }
    }
}

/// Operator confirmation of pending requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AutoActivationConfig {
    /// DERs activated per confirmation.
    pub der_count: usize,
    /// Output cap per DER (kW).
    pub max_output_kw: f32,
}

impl Default for AutoActivationConfig {
    fn default() -> Self {
        Self {
            der_count: 2,
            max_output_kw: 15.0,
        }
    }
}

/// Network identity and sandbox fault injection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    pub bap_id: String,
    pub bap_uri: String,
    /// Stage at which the sandbox reports failure.
    pub fail_stage: Option<Stage>,
    /// Simulated latency per sandbox call (ms).
    pub latency_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        let bap = BapIdentity::default();
        Self {
            bap_id: bap.bap_id,
            bap_uri: bap.bap_uri,
            fail_stage: None,
            latency_ms: 0,
        }
    }
}

/// One seeded feeder.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeederConfig {
    pub id: String,
    /// Defaults to `"Feeder <id>"`.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub substation_name: String,
    pub base_load_kw: f32,
    pub capacity_kw: f32,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(default)]
    pub connected_ders: u32,
}

impl FeederConfig {
    fn new(
        id: &str,
        substation: &str,
        base_load_kw: f32,
        capacity_kw: f32,
        connected_ders: u32,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: format!("Feeder {id}"),
            substation_name: format!("{substation} Substation"),
            base_load_kw,
            capacity_kw,
            criticality: Criticality::Medium,
            connected_ders,
        }
    }

    /// Builds the live feeder.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidFeeder` for a non-positive capacity or a
    /// negative base load.
    pub fn build(&self) -> Result<Feeder, GridError> {
        let name = if self.name.is_empty() {
            format!("Feeder {}", self.id)
        } else {
            self.name.clone()
        };
        Ok(Feeder::new(
            self.id.clone(),
            name,
            self.substation_name.clone(),
            self.base_load_kw,
            self.capacity_kw,
        )?
        .with_criticality(self.criticality)
        .with_connected_ders(self.connected_ders))
    }
}

fn london_feeders() -> Vec<FeederConfig> {
    let mut islington = FeederConfig::new("F-3456", "Islington", 35.8, 80.0, 6);
    islington.criticality = Criticality::Low;
    vec![
        FeederConfig::new("F-1234", "Westminster", 70.0, 95.0, 12),
        FeederConfig::new("F-5678", "Camden", 60.0, 90.0, 8),
        FeederConfig::new("F-9012", "Hackney", 42.1, 85.0, 15),
        islington,
        FeederConfig::new("F-7890", "Tower Hamlets", 55.2, 75.0, 10),
        FeederConfig::new("F-2468", "Lambeth", 62.0, 85.0, 14),
    ]
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("config error: {field}: {message}")]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.load_tick_ms"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::london()
    }
}

impl ScenarioConfig {
    /// The six London feeders at their everyday base loads.
    pub fn london() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            thresholds: Thresholds::default(),
            load_walk: WalkParams::default(),
            journey: JourneyConfig::default(),
            auto_activation: AutoActivationConfig::default(),
            gateway: GatewayConfig::default(),
            feeders: london_feeders(),
        }
    }

    /// Same network on a peak evening: most feeders start critical and
    /// demand spikes are more frequent.
    pub fn stressed() -> Self {
        let bases = [
            ("F-1234", 87.5),
            ("F-5678", 84.0),
            ("F-9012", 70.0),
            ("F-3456", 60.0),
            ("F-7890", 70.5),
            ("F-2468", 79.0),
        ];
        let mut feeders = london_feeders();
        for feeder in &mut feeders {
            if let Some((_, base)) = bases.iter().find(|(id, _)| *id == feeder.id) {
                feeder.base_load_kw = *base;
            }
        }
        feeders[0].criticality = Criticality::Critical;

        Self {
            simulation: SimulationConfig {
                seed: 7,
                ..SimulationConfig::default()
            },
            load_walk: WalkParams {
                spike_probability: 0.8,
                ..WalkParams::default()
            },
            auto_activation: AutoActivationConfig {
                max_output_kw: 20.0,
                ..AutoActivationConfig::default()
            },
            feeders,
            ..Self::london()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["london", "stressed"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "london" => Ok(Self::london()),
            "stressed" => Ok(Self::stressed()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns every violation found.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let s = &self.simulation;
        if s.load_tick_ms == 0 {
            errors.push(ConfigError::new("simulation.load_tick_ms", "must be > 0"));
        }
        if s.monitor_interval_ms == 0 {
            errors.push(ConfigError::new("simulation.monitor_interval_ms", "must be > 0"));
        } else if s.monitor_interval_ms <= s.load_tick_ms {
            errors.push(ConfigError::new(
                "simulation.monitor_interval_ms",
                "must be > simulation.load_tick_ms",
            ));
        }

        let th = &self.thresholds;
        if !(th.low_pct > 0.0) {
            errors.push(ConfigError::new("thresholds.low_pct", "must be > 0"));
        }
        if !(th.low_pct < th.high_pct) {
            errors.push(ConfigError::new("thresholds.low_pct", "must be < thresholds.high_pct"));
        }
        if !(th.load_ceiling_pct > 0.0) {
            errors.push(ConfigError::new("thresholds.load_ceiling_pct", "must be > 0"));
        }

        let w = &self.load_walk;
        if !(w.decay > 0.0 && w.decay < 1.0) {
            errors.push(ConfigError::new("load_walk.decay", "must be in (0.0, 1.0)"));
        }
        if !(0.0..=1.0).contains(&w.spike_probability) {
            errors.push(ConfigError::new(
                "load_walk.spike_probability",
                "must be in [0.0, 1.0]",
            ));
        }
        for (field, value) in [
            ("load_walk.normal_band", w.normal_band),
            ("load_walk.wide_band", w.wide_band),
            ("load_walk.spike_fraction", w.spike_fraction),
            ("load_walk.step_fraction", w.step_fraction),
            ("load_walk.rebound", w.rebound),
        ] {
            if !(value >= 0.0) {
                errors.push(ConfigError::new(field, "must be >= 0"));
            }
        }

        let j = &self.journey;
        if j.stage_timeout_ms == 0 {
            errors.push(ConfigError::new("journey.stage_timeout_ms", "must be > 0"));
        }
        if j.window_minutes <= 0 {
            errors.push(ConfigError::new("journey.window_minutes", "must be > 0"));
        }

        let a = &self.auto_activation;
        if a.der_count == 0 {
            errors.push(ConfigError::new("auto_activation.der_count", "must be > 0"));
        }
        if !(a.max_output_kw > 0.0) {
            errors.push(ConfigError::new("auto_activation.max_output_kw", "must be > 0"));
        }

        if self.feeders.is_empty() {
            errors.push(ConfigError::new("feeders", "must contain at least one feeder"));
        }
        let mut seen = HashSet::new();
        for (i, f) in self.feeders.iter().enumerate() {
            if f.id.is_empty() {
                errors.push(ConfigError::new(format!("feeders[{i}].id"), "must not be empty"));
            } else if !seen.insert(f.id.as_str()) {
                errors.push(ConfigError::new(
                    format!("feeders[{i}].id"),
                    format!("duplicate feeder id \"{}\"", f.id),
                ));
            }
            if !(f.capacity_kw > 0.0) || !f.capacity_kw.is_finite() {
                errors.push(ConfigError::new(
                    format!("feeders[{i}].capacity_kw"),
                    "must be > 0",
                ));
            }
            if !(f.base_load_kw >= 0.0) || !f.base_load_kw.is_finite() {
                errors.push(ConfigError::new(
                    format!("feeders[{i}].base_load_kw"),
                    "must be >= 0",
                ));
            }
        }

        errors
    }

    /// Builds the grid aggregate with a walk seeded from `simulation.seed`.
    ///
    /// # Errors
    ///
    /// Returns the first feeder that fails to build.
    pub fn build_state(&self) -> Result<GridState, GridError> {
        let feeders = self
            .feeders
            .iter()
            .map(FeederConfig::build)
            .collect::<Result<Vec<_>, _>>()?;
        GridState::new(
            feeders,
            self.thresholds,
            LoadWalk::new(self.load_walk, self.simulation.seed),
        )
    }

    /// Builds the sandbox gateway with any configured fault injection.
    pub fn build_gateway(&self) -> MockGateway {
        let mut gateway = MockGateway::default();
        if let Some(stage) = self.gateway.fail_stage {
            gateway = gateway.failing_at(stage);
        }
        if self.gateway.latency_ms > 0 {
            gateway = gateway.with_latency(Duration::from_millis(self.gateway.latency_ms));
        }
        gateway
    }

    pub fn journey_settings(&self) -> JourneySettings {
        JourneySettings {
            bap: BapIdentity {
                bap_id: self.gateway.bap_id.clone(),
                bap_uri: self.gateway.bap_uri.clone(),
            },
            stage_timeout: Duration::from_millis(self.journey.stage_timeout_ms),
            compensation: self.journey.compensation,
            window_minutes: self.journey.window_minutes,
        }
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            journey: self.journey_settings(),
            fulfillment: self.journey.fulfillment_type,
            auto_der_count: self.auto_activation.der_count,
            auto_max_output_kw: self.auto_activation.max_output_kw,
        }
    }

    pub fn load_tick(&self) -> Duration {
        Duration::from_millis(self.simulation.load_tick_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.simulation.monitor_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn london_preset_valid() {
        let cfg = ScenarioConfig::london();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "london should be valid: {errors:?}");
        assert_eq!(cfg.feeders.len(), 6);
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name);
            assert!(cfg.is_ok(), "preset \"{name}\" should load");
            let errors = cfg.as_ref().map(|c| c.validate()).unwrap_or_default();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn from_preset_unknown() {
        let err = ScenarioConfig::from_preset("nonexistent").expect_err("unknown");
        assert!(err.message.contains("unknown preset"));
        assert!(err.to_string().starts_with("config error: preset"));
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let toml = r#"
[simulation]
seed = 99
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).expect("parse");
        assert_eq!(cfg.simulation.seed, 99);
        assert_eq!(cfg.simulation.load_tick_ms, 3000);
        assert_eq!(cfg.thresholds.high_pct, 90.0);
        assert_eq!(cfg.feeders.len(), 6);
        assert_eq!(cfg.journey.compensation, Compensation::Cancel);
    }

    #[test]
    fn full_toml_parses() {
        let toml = r#"
[simulation]
seed = 1
load_tick_ms = 1000
monitor_interval_ms = 2000

[thresholds]
low_pct = 70.0
high_pct = 85.0

[load_walk]
spike_probability = 0.25

[journey]
fulfillment_type = "energy-storage"
stage_timeout_ms = 500
compensation = "none"

[auto_activation]
der_count = 1
max_output_kw = 30.0

[gateway]
bap_id = "test-bap"
fail_stage = "confirm"

[[feeders]]
id = "F-1"
base_load_kw = 50.0
capacity_kw = 60.0
criticality = "high"
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).expect("parse");
        assert!(cfg.validate().is_empty());
        assert_eq!(cfg.feeders.len(), 1);
        assert_eq!(cfg.feeders[0].criticality, Criticality::High);
        assert_eq!(cfg.gateway.fail_stage, Some(Stage::Confirm));
        assert_eq!(cfg.journey.fulfillment_type, FulfillmentType::EnergyStorage);
        assert_eq!(cfg.journey_settings().compensation, Compensation::None);

        let state = cfg.build_state().expect("state");
        assert_eq!(state.feeders()[0].name(), "Feeder F-1");
    }

    #[test]
    fn invalid_toml_unknown_field() {
        let toml = r#"
[simulation]
seed = 1
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn unknown_compensation_is_a_parse_error() {
        let toml = r#"
[journey]
compensation = "undo"
"#;
        let err = ScenarioConfig::from_toml_str(toml).expect_err("undo is not a mode");
        assert!(err.to_string().contains("undo"), "{err}");
    }

    #[test]
    fn validation_collects_every_violation() {
        let mut cfg = ScenarioConfig::london();
        cfg.simulation.load_tick_ms = 6000;
        cfg.thresholds.low_pct = 95.0;
        cfg.load_walk.decay = 1.0;
        cfg.load_walk.spike_probability = 1.5;
        cfg.feeders[1].id = "F-1234".to_string();
        cfg.feeders[2].capacity_kw = 0.0;

        let fields: Vec<String> = cfg.validate().into_iter().map(|e| e.field).collect();
        for expected in [
            "simulation.monitor_interval_ms",
            "thresholds.low_pct",
            "load_walk.decay",
            "load_walk.spike_probability",
            "feeders[1].id",
            "feeders[2].capacity_kw",
        ] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}: {fields:?}");
        }
    }

    #[test]
    fn validation_rejects_empty_feeders() {
        let mut cfg = ScenarioConfig::london();
        cfg.feeders.clear();
        assert!(cfg.validate().iter().any(|e| e.field == "feeders"));
    }

    #[test]
    fn stressed_starts_with_critical_feeders() {
        let cfg = ScenarioConfig::stressed();
        let state = cfg.build_state().expect("state");
        let critical = state
            .feeders()
            .iter()
            .filter(|f| f.load_pct() > cfg.thresholds.high_pct)
            .count();
        assert!(critical >= 3);
    }
}
