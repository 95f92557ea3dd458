/// Virtual clock merging the load-tick and scan timers.
pub mod clock;
pub mod engine;
pub mod kpi;
/// Telemetry rows and event lines.
pub mod types;

pub use clock::{Clock, TimerEvent};
pub use engine::{Engine, RunOutput};
pub use kpi::RunSummary;
pub use types::{EventKind, RunEvent, TelemetryRow};
