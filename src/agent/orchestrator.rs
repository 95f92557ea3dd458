//! Executes an agent plan against the grid service.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::planner::{AgentDecision, Urgency, plan};
use crate::beckn::journey::JourneyRequest;
use crate::beckn::types::{Quantity, Selection};
use crate::error::GridError;
use crate::grid::feeder::{Criticality, LoadStatus};
use crate::grid::state::FeederSnapshot;
use crate::service::{ActivationRequest, GridService};

/// Capacity assumed when a problem does not state one (kW).
const DEFAULT_CAPACITY_KW: f32 = 100.0;
/// Share of the stated capacity requested from a DER.
const DISPATCH_SHARE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProblemType {
    DemandSpike,
    FeederOverload,
    ForecastCongestion,
    GeneralOptimization,
}

/// A described grid problem handed to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridProblem {
    #[serde(rename = "type")]
    pub problem_type: ProblemType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feeder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_load: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<f32>,
    pub urgency: Urgency,
    pub description: String,
}

impl GridProblem {
    /// Derives a problem from a live feeder snapshot.
    ///
    /// Critical feeders map to `critical` urgency when their priority tag is
    /// critical or high, otherwise `high`; warning maps to `medium`.
    pub fn from_feeder(feeder: &FeederSnapshot) -> Self {
        let (problem_type, urgency) = match feeder.status {
            LoadStatus::Critical => {
                let urgency = match feeder.criticality {
                    Criticality::Critical | Criticality::High => Urgency::Critical,
                    Criticality::Medium | Criticality::Low => Urgency::High,
                };
                (ProblemType::FeederOverload, urgency)
            }
            LoadStatus::Warning => (ProblemType::ForecastCongestion, Urgency::Medium),
            LoadStatus::Normal => (ProblemType::GeneralOptimization, Urgency::Low),
        };

        Self {
            problem_type,
            feeder_id: Some(feeder.id.clone()),
            substation_id: Some(feeder.substation_name.clone()),
            current_load: Some(feeder.current_load),
            capacity: Some(feeder.capacity),
            urgency,
            description: format!(
                "{}: feeder {} at {:.1}% of capacity",
                urgency.to_string().to_uppercase(),
                feeder.id,
                feeder.load_percent
            ),
        }
    }

    /// Quantity requested when the plan activates a DER.
    pub fn dispatch_quantity(&self) -> Quantity {
        let capacity = self.capacity.unwrap_or(DEFAULT_CAPACITY_KW);
        Quantity::kw((capacity * DISPATCH_SHARE).round())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationResult {
    pub success: bool,
    pub problem: GridProblem,
    pub decisions: Vec<AgentDecision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    pub execution_time_ms: u64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Plans and executes the response to a grid problem.
///
/// - critical/high: full journey; the order is attributed to the named feeder
/// - medium: discovery plus a quote, nothing is activated
/// - low: discovery only
///
/// Failures are reported in the result, never returned as errors.
pub async fn orchestrate(service: &GridService, problem: GridProblem) -> OrchestrationResult {
    let started = Instant::now();
    let decisions = plan(problem.urgency, problem.feeder_id.as_deref());
    info!(
        urgency = %problem.urgency,
        feeder = problem.feeder_id.as_deref().unwrap_or("-"),
        steps = decisions.len(),
        "agent plan ready"
    );

    let executed = execute(service, &problem).await;
    let execution_time_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match executed {
        Ok((order_id, details)) => OrchestrationResult {
            success: true,
            problem,
            decisions,
            order_id,
            execution_time_ms,
            message: format!("Grid orchestration successful ({execution_time_ms}ms)"),
            details: Some(details),
        },
        Err(err) => {
            warn!(error = %err, "agent orchestration failed");
            OrchestrationResult {
                success: false,
                problem,
                decisions,
                order_id: None,
                execution_time_ms,
                message: format!("Orchestration failed: {err}"),
                details: None,
            }
        }
    }
}

async fn execute(
    service: &GridService,
    problem: &GridProblem,
) -> Result<(Option<String>, String), GridError> {
    let fulfillment = service.settings().fulfillment;
    match problem.urgency {
        Urgency::Critical | Urgency::High => {
            let quantity = problem.dispatch_quantity();
            match &problem.feeder_id {
                Some(feeder_id) => {
                    let activation = service
                        .activate(
                            Selection::First,
                            ActivationRequest {
                                feeder_id: feeder_id.clone(),
                                quantity,
                                window: None,
                            },
                        )
                        .await?;
                    let details = format!(
                        "DER {} activated for {feeder_id}: {:.0} kW",
                        activation.der_id, activation.output
                    );
                    Ok((Some(activation.order_id), details))
                }
                None => {
                    let outcome = service
                        .run_journey(&JourneyRequest::new(fulfillment, quantity))
                        .await?;
                    let details = format!("DER activated: {}", outcome.order.id);
                    Ok((Some(outcome.order.id), details))
                }
            }
        }
        Urgency::Medium => {
            let ack = service
                .prepare(&Selection::First, problem.dispatch_quantity())
                .await?;
            Ok((
                None,
                format!(
                    "{} quoted at {} {}, ready for activation",
                    ack.provider_id, ack.quote.price.value, ack.quote.price.currency
                ),
            ))
        }
        Urgency::Low => {
            let found = service.search(fulfillment, None).await?;
            let capacity: f32 = found.iter().map(|r| r.capacity).sum();
            Ok((
                None,
                format!("{} DERs available, {capacity:.1} kW total capacity", found.len()),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(urgency: Urgency, feeder: Option<&str>, capacity: Option<f32>) -> GridProblem {
        GridProblem {
            problem_type: ProblemType::DemandSpike,
            feeder_id: feeder.map(str::to_string),
            substation_id: None,
            current_load: None,
            capacity,
            urgency,
            description: "test".to_string(),
        }
    }

    #[test]
    fn dispatch_quantity_is_half_capacity_rounded() {
        assert_eq!(problem(Urgency::High, None, Some(95.0)).dispatch_quantity().amount, 48.0);
        assert_eq!(problem(Urgency::High, None, None).dispatch_quantity().amount, 50.0);
    }

    #[test]
    fn problem_deserializes_from_wire_shape() {
        let json = r#"{
            "type": "demand-spike",
            "feederId": "F-1234",
            "currentLoad": 92,
            "capacity": 95,
            "urgency": "critical",
            "description": "CRITICAL: Feeder F-1234 at 92% capacity"
        }"#;
        let p: GridProblem = serde_json::from_str(json).expect("parse");
        assert_eq!(p.problem_type, ProblemType::DemandSpike);
        assert_eq!(p.urgency, Urgency::Critical);
        assert_eq!(p.feeder_id.as_deref(), Some("F-1234"));
        assert!(p.substation_id.is_none());
    }
}
