use std::fmt;

use serde::{Deserialize, Serialize};

/// How quickly a grid problem needs a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Medium,
    High,
    Critical,
}

impl Urgency {
    /// `true` for the tiers that run the full journey immediately.
    pub fn activates(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A protocol action in an agent plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Discover,
    Select,
    Init,
    Confirm,
    Status,
    Cancel,
}

/// One planned step with its rationale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDecision {
    /// 1-based position in the plan.
    pub step: usize,
    pub action: Action,
    pub reasoning: String,
    pub expected_outcome: String,
}

/// Returns the action sequence for an urgency tier.
///
/// Pure: the same urgency always yields the same sequence.
pub fn actions_for(urgency: Urgency) -> &'static [Action] {
    match urgency {
        Urgency::Critical | Urgency::High => &[
            Action::Discover,
            Action::Select,
            Action::Init,
            Action::Confirm,
            Action::Status,
        ],
        Urgency::Medium => &[Action::Discover, Action::Select, Action::Status],
        Urgency::Low => &[Action::Discover],
    }
}

/// Builds the full decision list for a problem.
///
/// `subject` names the feeder (or the grid) in the first step's reasoning.
pub fn plan(urgency: Urgency, subject: Option<&str>) -> Vec<AgentDecision> {
    actions_for(urgency)
        .iter()
        .enumerate()
        .map(|(i, &action)| {
            let (reasoning, expected) = rationale(urgency, action, subject.unwrap_or("Grid"));
            AgentDecision {
                step: i + 1,
                action,
                reasoning,
                expected_outcome: expected.to_string(),
            }
        })
        .collect()
}

fn rationale(urgency: Urgency, action: Action, subject: &str) -> (String, &'static str) {
    match (urgency.activates(), urgency, action) {
        (true, _, Action::Discover) => (
            format!("{subject} at {urgency} load. Discovering available DER providers immediately."),
            "Provider catalog returned",
        ),
        (true, _, Action::Select) => (
            "Selecting the first available DER resource".to_string(),
            "Provider selected with quote and terms",
        ),
        (true, _, Action::Init) => (
            "Preparing the order with fulfillment window".to_string(),
            "Order allocated in DRAFT",
        ),
        (true, _, Action::Confirm) => (
            "Confirming DER activation to reduce load".to_string(),
            "Order ACTIVE, load reduction begins",
        ),
        (true, _, _) => (
            "Verifying the DER is active".to_string(),
            "Order reported ACTIVE",
        ),
        (false, Urgency::Medium, Action::Discover) => (
            "Medium urgency: discovering DER options ahead of need".to_string(),
            "Provider catalog returned",
        ),
        (false, Urgency::Medium, Action::Select) => (
            "Pre-selecting a resource for quick activation if needed".to_string(),
            "Resource quoted, not activated",
        ),
        (false, Urgency::Medium, _) => (
            "Checking readiness of the quoted resource".to_string(),
            "Current availability",
        ),
        (false, _, _) => (
            "Low urgency: surveying available DER capacity for planning".to_string(),
            "Provider catalog returned",
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_plan_is_full_journey() {
        let steps: Vec<Action> = plan(Urgency::Critical, Some("F-1234"))
            .iter()
            .map(|d| d.action)
            .collect();
        assert_eq!(
            steps,
            vec![
                Action::Discover,
                Action::Select,
                Action::Init,
                Action::Confirm,
                Action::Status
            ]
        );
    }

    #[test]
    fn high_matches_critical() {
        assert_eq!(actions_for(Urgency::High), actions_for(Urgency::Critical));
    }

    #[test]
    fn medium_prepares_without_confirming() {
        assert_eq!(
            actions_for(Urgency::Medium),
            &[Action::Discover, Action::Select, Action::Status]
        );
    }

    #[test]
    fn low_only_discovers() {
        let decisions = plan(Urgency::Low, None);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].action, Action::Discover);
        assert_eq!(decisions[0].step, 1);
    }

    #[test]
    fn plan_is_deterministic() {
        for u in [Urgency::Low, Urgency::Medium, Urgency::High, Urgency::Critical] {
            assert_eq!(plan(u, Some("F-1")), plan(u, Some("F-1")));
        }
    }

    #[test]
    fn first_step_names_subject() {
        let decisions = plan(Urgency::Critical, Some("F-5678"));
        assert!(decisions[0].reasoning.contains("F-5678"));
        assert_eq!(decisions[4].step, 5);
    }
}
