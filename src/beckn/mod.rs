//! Beckn protocol types, the gateway seam, and the fulfillment journey.

pub mod gateway;
pub mod journey;
pub mod types;

pub use gateway::{MockGateway, ProtocolGateway, sandbox_catalog};
pub use journey::{
    Compensation, Journey, JourneyOutcome, JourneyPhase, JourneyRequest, JourneySettings,
};
pub use types::{
    BapIdentity, BecknContext, DerResource, FulfillmentType, Order, OrderState, Quantity,
    Selection, SelectionAck, Stage, StageOutcome,
};
