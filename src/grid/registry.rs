use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::GridError;

/// One DER currently mitigating a feeder.
///
/// Records are never updated in place; deactivation removes them entirely.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveDer {
    pub order_id: String,
    pub der_id: String,
    pub feeder_id: String,
    /// Fixed kW reduction for the life of the record.
    pub output_kw: f32,
    pub activated_at: DateTime<Utc>,
}

/// Order-keyed map of active DER records.
///
/// The registry only stores records; keeping feeder contributions in step
/// with it is the job of [`GridState`](super::state::GridState).
#[derive(Debug, Clone, Default)]
pub struct ActivationRegistry {
    records: HashMap<String, ActiveDer>,
    last_activation: HashMap<String, DateTime<Utc>>,
}

impl ActivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record under its order id.
    ///
    /// # Errors
    ///
    /// Returns `GridError::DuplicateOrder` if the order id is already present.
    pub fn insert(&mut self, record: ActiveDer) -> Result<(), GridError> {
        if self.records.contains_key(&record.order_id) {
            return Err(GridError::DuplicateOrder(record.order_id));
        }
        self.last_activation
            .insert(record.feeder_id.clone(), record.activated_at);
        self.records.insert(record.order_id.clone(), record);
        Ok(())
    }

    /// Removes a record. Unknown order ids return `None`.
    pub fn remove(&mut self, order_id: &str) -> Option<ActiveDer> {
        self.records.remove(order_id)
    }

    pub fn get(&self, order_id: &str) -> Option<&ActiveDer> {
        self.records.get(order_id)
    }

    pub fn contains(&self, order_id: &str) -> bool {
        self.records.contains_key(order_id)
    }

    /// Records for one feeder, oldest activation first.
    pub fn list_by_feeder(&self, feeder_id: &str) -> Vec<ActiveDer> {
        let mut out: Vec<ActiveDer> = self
            .records
            .values()
            .filter(|r| r.feeder_id == feeder_id)
            .cloned()
            .collect();
        sort_records(&mut out);
        out
    }

    /// All records, oldest activation first.
    pub fn list_all(&self) -> Vec<ActiveDer> {
        let mut out: Vec<ActiveDer> = self.records.values().cloned().collect();
        sort_records(&mut out);
        out
    }

    /// Order ids attributed to one feeder.
    pub fn order_ids_for(&self, feeder_id: &str) -> Vec<String> {
        self.list_by_feeder(feeder_id)
            .into_iter()
            .map(|r| r.order_id)
            .collect()
    }

    pub fn count_for(&self, feeder_id: &str) -> usize {
        self.records
            .values()
            .filter(|r| r.feeder_id == feeder_id)
            .count()
    }

    /// Sum of outputs attributed to one feeder.
    pub fn contribution_for(&self, feeder_id: &str) -> f32 {
        self.records
            .values()
            .filter(|r| r.feeder_id == feeder_id)
            .map(|r| r.output_kw)
            .sum()
    }

    /// Time since the feeder's most recent activation, if it ever had one.
    pub fn response_time(&self, feeder_id: &str, now: DateTime<Utc>) -> Option<Duration> {
        self.last_activation
            .get(feeder_id)
            .map(|at| (now - *at).max(Duration::zero()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn sort_records(records: &mut [ActiveDer]) {
    records.sort_by(|a, b| {
        a.activated_at
            .cmp(&b.activated_at)
            .then_with(|| a.order_id.cmp(&b.order_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(order: &str, feeder: &str, kw: f32) -> ActiveDer {
        ActiveDer {
            order_id: order.to_string(),
            der_id: "DER-BATT-001".to_string(),
            feeder_id: feeder.to_string(),
            output_kw: kw,
            activated_at: Utc::now(),
        }
    }

    #[test]
    fn test_insert_and_query() {
        let mut reg = ActivationRegistry::new();
        reg.insert(record("ORD-1", "F-1234", 10.0)).expect("insert");
        reg.insert(record("ORD-2", "F-1234", 5.0)).expect("insert");
        reg.insert(record("ORD-3", "F-5678", 7.0)).expect("insert");

        assert_eq!(reg.len(), 3);
        assert_eq!(reg.list_by_feeder("F-1234").len(), 2);
        assert_eq!(reg.count_for("F-5678"), 1);
        assert!((reg.contribution_for("F-1234") - 15.0).abs() < 1e-6);
        assert_eq!(reg.contribution_for("F-0000"), 0.0);
    }

    #[test]
    fn test_duplicate_order_rejected() {
        let mut reg = ActivationRegistry::new();
        reg.insert(record("ORD-1", "F-1234", 10.0)).expect("insert");
        let err = reg.insert(record("ORD-1", "F-5678", 3.0));
        assert!(matches!(err, Err(GridError::DuplicateOrder(id)) if id == "ORD-1"));
        assert_eq!(reg.contribution_for("F-5678"), 0.0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut reg = ActivationRegistry::new();
        reg.insert(record("ORD-1", "F-1234", 10.0)).expect("insert");
        assert!(reg.remove("ORD-1").is_some());
        assert!(reg.remove("ORD-1").is_none());
        assert!(reg.remove("ORD-404").is_none());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_response_time_survives_deactivation() {
        let mut reg = ActivationRegistry::new();
        assert!(reg.response_time("F-1234", Utc::now()).is_none());

        let mut r = record("ORD-1", "F-1234", 10.0);
        r.activated_at = Utc::now() - Duration::seconds(3);
        reg.insert(r).expect("insert");
        reg.remove("ORD-1");

        let elapsed = reg
            .response_time("F-1234", Utc::now())
            .expect("activated once");
        assert!(elapsed >= Duration::seconds(3));
    }
}
