//! Background tasks driving the load tick and the control-loop scan.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info};

use crate::config::ScenarioConfig;
use crate::service::GridService;

/// Periods of the two independent timers.
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    /// T1: random-walk load tick.
    pub load_tick: Duration,
    /// T2: auto-activation / deactivation scan.
    pub monitor_interval: Duration,
}

impl Timers {
    pub fn from_config(config: &ScenarioConfig) -> Self {
        Self {
            load_tick: config.load_tick(),
            monitor_interval: config.monitor_interval(),
        }
    }
}

/// Running periodic tasks. Dropping the handle does not stop them; call
/// [`RuntimeHandle::shutdown`].
pub struct RuntimeHandle {
    shutdown: broadcast::Sender<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signals both tasks and waits for them to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        for task in self.tasks {
            let _ = task.await;
        }
        info!("periodic tasks stopped");
    }
}

/// Spawns the load-tick and monitor tasks on the current tokio runtime.
///
/// Each timer first fires one full period after the call.
pub fn spawn(service: Arc<GridService>, timers: Timers) -> RuntimeHandle {
    let (shutdown, _) = broadcast::channel(4);

    let load_task = spawn_periodic(
        "load-tick",
        timers.load_tick,
        shutdown.subscribe(),
        {
            let service = service.clone();
            move || {
                let cycle = service.tick_load();
                debug!(cycle, "load tick");
            }
        },
    );

    let monitor_task = spawn_periodic(
        "monitor",
        timers.monitor_interval,
        shutdown.subscribe(),
        move || {
            let report = service.run_monitor();
            if !report.is_quiet() {
                info!(
                    stood_down = report.stood_down.len(),
                    flagged = report.flagged.len(),
                    cleared = report.cleared.len(),
                    errors = report.errors.len(),
                    "monitor scan"
                );
            }
        },
    );

    info!(
        load_tick_ms = timers.load_tick.as_millis() as u64,
        monitor_ms = timers.monitor_interval.as_millis() as u64,
        "periodic tasks started"
    );
    RuntimeHandle {
        shutdown,
        tasks: vec![load_task, monitor_task],
    }
}

fn spawn_periodic(
    name: &'static str,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut f: impl FnMut() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(task = name, "shutdown signal received");
                    break;
                }
                _ = ticker.tick() => f(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_tick_and_stop() {
        let service =
            Arc::new(GridService::from_config(&ScenarioConfig::london()).expect("service"));
        let handle = spawn(
            service.clone(),
            Timers {
                load_tick: Duration::from_millis(10),
                monitor_interval: Duration::from_millis(25),
            },
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.shutdown().await;

        let cycles = service.with_state(|s| s.cycle());
        assert!(cycles >= 3, "expected several ticks, got {cycles}");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(service.with_state(|s| s.cycle()), cycles);
    }
}
