//! Feeder load model, activation registry and control-loop scan.

pub mod feeder;
pub mod load_walk;
pub mod monitor;
pub mod registry;
pub mod state;

pub use feeder::{Criticality, Feeder, LoadStatus, Thresholds};
pub use load_walk::{LoadWalk, WalkParams};
pub use monitor::{FeederPhase, ScanReport, StandDown};
pub use registry::{ActivationRegistry, ActiveDer};
pub use state::{FeederSnapshot, GridState};
