//! Error taxonomy shared by the grid model, the journey runner, and the API.

use thiserror::Error;

use crate::beckn::types::Stage;

/// Errors raised by request-triggered grid operations and the control loop.
#[derive(Debug, Error)]
pub enum GridError {
    /// Unknown feeder identifier.
    #[error("feeder {0} not found")]
    FeederNotFound(String),
    /// Unknown order identifier where one is required.
    #[error("order {0} not found")]
    OrderNotFound(String),
    /// An activation record already exists under this order identifier.
    #[error("order {0} is already active")]
    DuplicateOrder(String),
    /// Feeder definition or live state breaks a model invariant.
    #[error("invalid feeder {feeder}: {reason}")]
    InvalidFeeder { feeder: String, reason: String },
    /// DER output must be finite and non-negative.
    #[error("invalid DER output {0} kW")]
    InvalidOutput(f32),
    /// Confirm was requested for a feeder without a pending auto-activation flag.
    #[error("feeder {0} has no pending auto-activation request")]
    NotPending(String),
    /// One feeder failed evaluation during a control-loop scan.
    #[error("evaluation of feeder {feeder} failed: {reason}")]
    Evaluation { feeder: String, reason: String },
    /// A protocol journey aborted.
    #[error(transparent)]
    Journey(#[from] JourneyError),
}

/// Errors that abort a fulfillment journey.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JourneyError {
    /// Search returned an empty catalog. Terminal, never retried.
    #[error("no providers found")]
    NoProviders,
    /// Explicit selection named a resource the catalog does not offer.
    #[error("provider {0} is not in the catalog")]
    ProviderNotFound(String),
    /// The gateway reported a failure for a stage.
    #[error("{stage} stage failed: {reason}")]
    StageFailed { stage: Stage, reason: String },
    /// The gateway did not answer within the stage timeout.
    #[error("{stage} stage timed out after {timeout_ms} ms")]
    Timeout { stage: Stage, timeout_ms: u64 },
    /// A stage was attempted out of protocol order.
    #[error("{attempted} cannot run while the journey is {phase}")]
    OutOfOrder { phase: String, attempted: Stage },
    /// The gateway does not know the order.
    #[error("order {0} not found")]
    OrderNotFound(String),
}

/// Result alias for grid operations.
pub type Result<T> = std::result::Result<T, GridError>;
