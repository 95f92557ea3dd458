//! Grid command center: feeder load monitoring with DER dispatch over a
//! Beckn-style fulfillment journey.

pub mod agent;
#[cfg(feature = "api")]
pub mod api;
pub mod audit;
pub mod beckn;
pub mod config;
pub mod error;
/// Feeder load model, activation registry and control loop.
pub mod grid;
pub mod io;
pub mod logging;
pub mod runtime;
pub mod service;
/// Headless virtual-time runs and their summaries.
pub mod sim;
#[cfg(feature = "tui")]
pub mod tui;

pub use error::{GridError, JourneyError, Result};
pub use service::GridService;
