//! Rule-table agent that plans and runs protocol journeys for grid problems.

pub mod orchestrator;
pub mod planner;

pub use orchestrator::{GridProblem, OrchestrationResult, ProblemType, orchestrate};
pub use planner::{Action, AgentDecision, Urgency, actions_for, plan};
