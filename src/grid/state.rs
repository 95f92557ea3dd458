use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use super::feeder::{Criticality, Feeder, LoadStatus, Thresholds};
use super::load_walk::LoadWalk;
use super::registry::{ActivationRegistry, ActiveDer};
use crate::error::{GridError, Result};

/// Read-only view of one feeder as served to pollers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeederSnapshot {
    pub id: String,
    pub name: String,
    pub substation_name: String,
    pub criticality: Criticality,
    pub connected_ders: u32,
    pub capacity: f32,
    pub base_load: f32,
    pub target_load: f32,
    pub current_load: f32,
    pub load_percent: f32,
    pub status: LoadStatus,
    #[serde(rename = "activeDERContribution")]
    pub active_der_contribution: f32,
    #[serde(rename = "activeDERs")]
    pub active_ders: Vec<ActiveDer>,
    /// Milliseconds since the feeder's most recent activation.
    pub response_time: Option<i64>,
    pub is_responding: bool,
    pub pending_auto_activation: bool,
}

/// The single owner of all mutable grid simulation state.
///
/// Feeders, the activation registry and the pending auto-activation flags
/// change together through this type only, so a feeder's contribution always
/// equals the sum of its registry records.
#[derive(Debug, Clone)]
pub struct GridState {
    feeders: Vec<Feeder>,
    index: HashMap<String, usize>,
    registry: ActivationRegistry,
    pending: BTreeSet<String>,
    walk: LoadWalk,
    cycle: u64,
    thresholds: Thresholds,
}

impl GridState {
    /// Builds the aggregate from a fixed feeder set.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidFeeder` if two feeders share an id.
    pub fn new(feeders: Vec<Feeder>, thresholds: Thresholds, walk: LoadWalk) -> Result<Self> {
        let mut index = HashMap::with_capacity(feeders.len());
        for (i, f) in feeders.iter().enumerate() {
            if index.insert(f.id().to_string(), i).is_some() {
                return Err(GridError::InvalidFeeder {
                    feeder: f.id().to_string(),
                    reason: "duplicate feeder id".to_string(),
                });
            }
        }

        Ok(Self {
            feeders,
            index,
            registry: ActivationRegistry::new(),
            pending: BTreeSet::new(),
            walk,
            cycle: 0,
            thresholds,
        })
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Feeders in their seeded order.
    pub fn feeders(&self) -> &[Feeder] {
        &self.feeders
    }

    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn feeder(&self, feeder_id: &str) -> Result<&Feeder> {
        self.index
            .get(feeder_id)
            .map(|&i| &self.feeders[i])
            .ok_or_else(|| GridError::FeederNotFound(feeder_id.to_string()))
    }

    fn feeder_mut(&mut self, feeder_id: &str) -> Result<&mut Feeder> {
        match self.index.get(feeder_id) {
            Some(&i) => Ok(&mut self.feeders[i]),
            None => Err(GridError::FeederNotFound(feeder_id.to_string())),
        }
    }

    pub fn registry(&self) -> &ActivationRegistry {
        &self.registry
    }

    /// Number of load ticks applied so far.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Advances every feeder's demand by one random-walk step.
    ///
    /// Returns the new cycle number (the first tick is cycle 1).
    pub fn tick_load(&mut self) -> u64 {
        self.cycle += 1;
        let cycle = self.cycle;
        let thresholds = self.thresholds;
        for feeder in &mut self.feeders {
            let variance =
                self.walk
                    .step(feeder.variance_kw(), feeder.base_load_kw(), cycle);
            feeder.apply_walk(variance, &thresholds);
        }
        debug!(cycle, "load tick applied");
        cycle
    }

    /// Overrides one feeder's simulated demand.
    ///
    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id, or
    /// `GridError::InvalidFeeder` for a non-finite value.
    pub fn set_target_load(&mut self, feeder_id: &str, kw: f32) -> Result<()> {
        if !kw.is_finite() {
            return Err(GridError::InvalidFeeder {
                feeder: feeder_id.to_string(),
                reason: format!("target load must be finite, got {kw}"),
            });
        }
        let thresholds = self.thresholds;
        self.feeder_mut(feeder_id)?.set_target_load_kw(kw, &thresholds);
        Ok(())
    }

    /// Attributes a confirmed order to a feeder.
    ///
    /// Clears any pending auto-activation flag for the feeder.
    ///
    /// # Errors
    ///
    /// - `GridError::FeederNotFound` if the feeder does not exist
    /// - `GridError::InvalidOutput` if `output_kw` is negative or non-finite
    /// - `GridError::DuplicateOrder` if the order id is already active
    pub fn activate(
        &mut self,
        der_id: &str,
        feeder_id: &str,
        output_kw: f32,
        order_id: &str,
    ) -> Result<ActiveDer> {
        self.feeder(feeder_id)?;
        if !output_kw.is_finite() || output_kw < 0.0 {
            return Err(GridError::InvalidOutput(output_kw));
        }

        let record = ActiveDer {
            order_id: order_id.to_string(),
            der_id: der_id.to_string(),
            feeder_id: feeder_id.to_string(),
            output_kw,
            activated_at: Utc::now(),
        };
        self.registry.insert(record.clone())?;
        self.sync_contribution(feeder_id);
        self.pending.remove(feeder_id);
        Ok(record)
    }

    /// Removes an activation record. Unknown order ids are a no-op.
    pub fn deactivate(&mut self, order_id: &str) -> Option<ActiveDer> {
        let record = self.registry.remove(order_id)?;
        self.sync_contribution(&record.feeder_id);
        Some(record)
    }

    /// Stands down every DER attributed to a feeder and clears its flag.
    ///
    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn deactivate_feeder(&mut self, feeder_id: &str) -> Result<Vec<ActiveDer>> {
        self.feeder(feeder_id)?;
        let removed: Vec<ActiveDer> = self
            .registry
            .order_ids_for(feeder_id)
            .iter()
            .filter_map(|order_id| self.registry.remove(order_id))
            .collect();
        self.sync_contribution(feeder_id);
        self.pending.remove(feeder_id);
        Ok(removed)
    }

    fn sync_contribution(&mut self, feeder_id: &str) {
        let total = self.registry.contribution_for(feeder_id);
        if let Some(&i) = self.index.get(feeder_id) {
            self.feeders[i].set_active_der_contribution_kw(total);
        }
    }

    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn current_load(&self, feeder_id: &str) -> Result<f32> {
        Ok(self.feeder(feeder_id)?.current_load_kw())
    }

    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn status(&self, feeder_id: &str) -> Result<LoadStatus> {
        Ok(self.feeder(feeder_id)?.status(&self.thresholds))
    }

    pub fn response_time(&self, feeder_id: &str) -> Option<Duration> {
        self.registry.response_time(feeder_id, Utc::now())
    }

    /// Raises the pending auto-activation flag. Returns `false` if already set.
    pub fn flag_pending(&mut self, feeder_id: &str) -> bool {
        self.pending.insert(feeder_id.to_string())
    }

    /// Clears the pending flag. Returns `false` if it was not set.
    pub fn clear_pending(&mut self, feeder_id: &str) -> bool {
        self.pending.remove(feeder_id)
    }

    pub fn is_pending(&self, feeder_id: &str) -> bool {
        self.pending.contains(feeder_id)
    }

    /// Flagged feeder ids in sorted order.
    pub fn pending(&self) -> Vec<String> {
        self.pending.iter().cloned().collect()
    }

    /// Snapshot of every feeder, in seeded order.
    pub fn snapshot(&self) -> Vec<FeederSnapshot> {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<FeederSnapshot> {
        self.feeders
            .iter()
            .map(|f| {
                let active_ders = self.registry.list_by_feeder(f.id());
                FeederSnapshot {
                    id: f.id().to_string(),
                    name: f.name().to_string(),
                    substation_name: f.substation_name().to_string(),
                    criticality: f.criticality(),
                    connected_ders: f.connected_ders(),
                    capacity: f.capacity_kw(),
                    base_load: f.base_load_kw(),
                    target_load: f.target_load_kw(),
                    current_load: f.current_load_kw(),
                    load_percent: f.load_pct(),
                    status: f.status(&self.thresholds),
                    active_der_contribution: f.active_der_contribution_kw(),
                    is_responding: !active_ders.is_empty(),
                    active_ders,
                    response_time: self
                        .registry
                        .response_time(f.id(), now)
                        .map(|d| d.num_milliseconds()),
                    pending_auto_activation: self.pending.contains(f.id()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::load_walk::WalkParams;

    fn state() -> GridState {
        let feeders = vec![
            Feeder::new("F-1234", "Feeder F-1234", "Westminster", 87.5, 95.0).expect("feeder"),
            Feeder::new("F-5678", "Feeder F-5678", "Camden", 60.0, 90.0).expect("feeder"),
        ];
        GridState::new(
            feeders,
            Thresholds::default(),
            LoadWalk::new(WalkParams::default(), 42),
        )
        .expect("state")
    }

    fn assert_consistent(s: &GridState) {
        for f in s.feeders() {
            let sum: f32 = s
                .registry()
                .list_by_feeder(f.id())
                .iter()
                .map(|r| r.output_kw)
                .sum();
            assert!((f.active_der_contribution_kw() - sum).abs() < 1e-4);
            assert!(f.current_load_kw() >= 0.0);
        }
    }

    #[test]
    fn test_rejects_duplicate_feeder_ids() {
        let feeders = vec![
            Feeder::new("F-1", "a", "s", 1.0, 10.0).expect("feeder"),
            Feeder::new("F-1", "b", "s", 1.0, 10.0).expect("feeder"),
        ];
        let walk = LoadWalk::new(WalkParams::default(), 1);
        assert!(GridState::new(feeders, Thresholds::default(), walk).is_err());
    }

    #[test]
    fn test_activation_example() {
        let mut s = state();
        assert_eq!(s.status("F-1234").expect("status"), LoadStatus::Critical);

        s.activate("DER-BATT-001", "F-1234", 25.0, "ORD-1")
            .expect("activate");
        assert!((s.current_load("F-1234").expect("load") - 62.5).abs() < 1e-4);
        assert_eq!(s.status("F-1234").expect("status"), LoadStatus::Normal);

        s.deactivate("ORD-1");
        assert!((s.current_load("F-1234").expect("load") - 87.5).abs() < 1e-4);
        assert_eq!(s.status("F-1234").expect("status"), LoadStatus::Critical);
        assert_consistent(&s);
    }

    #[test]
    fn test_activate_validates_inputs() {
        let mut s = state();
        assert!(matches!(
            s.activate("D", "F-0000", 5.0, "ORD-1"),
            Err(GridError::FeederNotFound(_))
        ));
        assert!(matches!(
            s.activate("D", "F-1234", -1.0, "ORD-1"),
            Err(GridError::InvalidOutput(_))
        ));
        assert!(matches!(
            s.activate("D", "F-1234", f32::NAN, "ORD-1"),
            Err(GridError::InvalidOutput(_))
        ));
        s.activate("D", "F-1234", 5.0, "ORD-1").expect("activate");
        assert!(matches!(
            s.activate("D", "F-5678", 5.0, "ORD-1"),
            Err(GridError::DuplicateOrder(_))
        ));
        assert_consistent(&s);
    }

    #[test]
    fn test_deactivate_twice_never_double_subtracts() {
        let mut s = state();
        s.activate("A", "F-1234", 10.0, "ORD-1").expect("activate");
        s.activate("B", "F-1234", 4.0, "ORD-2").expect("activate");
        assert!(s.deactivate("ORD-1").is_some());
        assert!(s.deactivate("ORD-1").is_none());
        let f = s.feeder("F-1234").expect("feeder");
        assert!((f.active_der_contribution_kw() - 4.0).abs() < 1e-6);
        assert_consistent(&s);
    }

    #[test]
    fn test_activation_clears_pending_flag() {
        let mut s = state();
        assert!(s.flag_pending("F-1234"));
        assert!(!s.flag_pending("F-1234"));
        s.activate("A", "F-1234", 10.0, "ORD-1").expect("activate");
        assert!(!s.is_pending("F-1234"));
    }

    #[test]
    fn test_deactivate_feeder_removes_all() {
        let mut s = state();
        s.activate("A", "F-1234", 10.0, "ORD-1").expect("activate");
        s.activate("B", "F-1234", 4.0, "ORD-2").expect("activate");
        s.activate("C", "F-5678", 3.0, "ORD-3").expect("activate");
        let removed = s.deactivate_feeder("F-1234").expect("stand down");
        assert_eq!(removed.len(), 2);
        assert_eq!(s.registry().len(), 1);
        assert_consistent(&s);
    }

    #[test]
    fn test_tick_is_seed_deterministic() {
        let mut a = state();
        let mut b = state();
        for _ in 0..30 {
            a.tick_load();
            b.tick_load();
        }
        assert_eq!(a.cycle(), 30);
        for (fa, fb) in a.feeders().iter().zip(b.feeders()) {
            assert_eq!(fa.target_load_kw(), fb.target_load_kw());
        }
    }

    #[test]
    fn test_snapshot_fields() {
        let mut s = state();
        s.activate("A", "F-1234", 25.0, "ORD-1").expect("activate");
        s.flag_pending("F-5678");
        let snap = s.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap[0].is_responding);
        assert_eq!(snap[0].active_ders.len(), 1);
        assert!(snap[0].response_time.is_some());
        assert!(!snap[1].is_responding);
        assert!(snap[1].response_time.is_none());
        assert!(snap[1].pending_auto_activation);
    }
}
