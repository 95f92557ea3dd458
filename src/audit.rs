//! Append-only audit trail of operator and control-loop actions.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use uuid::Uuid;

/// Entries kept before the oldest are dropped.
pub const DEFAULT_CAPACITY: usize = 500;

/// Outcome tag attached to an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Error,
    Info,
}

/// One audit record.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// `LOG-` followed by eight upper-case hex characters.
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub user: String,
    pub target: String,
    pub status: AuditStatus,
    pub description: String,
}

/// Bounded in-memory audit sink, newest entry first.
#[derive(Debug)]
pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl AuditLog {
    /// Creates an empty log holding at most `capacity` entries (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Records an entry and returns a copy of it.
    pub fn record(
        &self,
        action: &str,
        user: &str,
        target: &str,
        status: AuditStatus,
        description: impl Into<String>,
    ) -> AuditEntry {
        let simple = Uuid::new_v4().simple().to_string();
        let entry = AuditEntry {
            id: format!("LOG-{}", simple[..8].to_uppercase()),
            timestamp: Utc::now(),
            action: action.to_string(),
            user: user.to_string(),
            target: target.to_string(),
            status,
            description: description.into(),
        };

        let mut entries = self.entries.lock();
        entries.push_front(entry.clone());
        entries.truncate(self.capacity);
        entry
    }

    /// Returns all entries, newest first.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Returns the `n` newest entries.
    pub fn latest(&self, n: usize) -> Vec<AuditEntry> {
        self.entries.lock().iter().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_entry_comes_first() {
        let log = AuditLog::default();
        log.record("DER Activation", "operator", "F-1234", AuditStatus::Success, "first");
        log.record("DER Deactivation", "operator", "F-1234", AuditStatus::Info, "second");

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].description, "second");
        assert_eq!(entries[1].description, "first");
    }

    #[test]
    fn ids_have_log_prefix() {
        let log = AuditLog::default();
        let entry = log.record("Dismiss", "operator", "F-5678", AuditStatus::Info, "");
        assert!(entry.id.starts_with("LOG-"));
        assert_eq!(entry.id.len(), 12);
        assert_eq!(entry.id, entry.id.to_uppercase());
    }

    #[test]
    fn capacity_drops_oldest() {
        let log = AuditLog::with_capacity(3);
        for i in 0..5 {
            log.record("Tick", "system", "grid", AuditStatus::Info, format!("{i}"));
        }
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].description, "4");
        assert_eq!(entries[2].description, "2");
        assert_eq!(log.latest(1)[0].description, "4");
    }
}
