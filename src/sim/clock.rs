use std::time::Duration;

/// Which periodic job fires at a virtual instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// T1: advance every feeder's random walk.
    LoadTick,
    /// T2: run the control-loop scan.
    MonitorScan,
}

/// A virtual clock that merges the two periodic timers over a fixed duration.
///
/// Timer `k` of each kind fires at `k × period` for `k ≥ 1`, up to and
/// including the duration. When both fire at the same instant the load tick
/// comes first.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use grid_command_center::sim::clock::{Clock, TimerEvent};
///
/// let mut clock = Clock::new(
///     Duration::from_millis(3),
///     Duration::from_millis(5),
///     Duration::from_millis(10),
/// );
/// let mut events = Vec::new();
///
/// clock.run(|at, event| events.push((at, event)));
/// assert_eq!(
///     events,
///     vec![
///         (3, TimerEvent::LoadTick),
///         (5, TimerEvent::MonitorScan),
///         (6, TimerEvent::LoadTick),
///         (9, TimerEvent::LoadTick),
///         (10, TimerEvent::MonitorScan),
///     ]
/// );
/// ```
pub struct Clock {
    load_tick_ms: u64,
    monitor_ms: u64,
    duration_ms: u64,
    next_load_ms: u64,
    next_monitor_ms: u64,
}

impl Clock {
    /// Creates a clock for the given timer periods and run length.
    ///
    /// A zero period never fires.
    ///
    /// # Arguments
    ///
    /// * `load_tick` - Period of the load tick (T1)
    /// * `monitor_interval` - Period of the control-loop scan (T2)
    /// * `duration` - Total virtual time to cover
    pub fn new(load_tick: Duration, monitor_interval: Duration, duration: Duration) -> Self {
        let load_tick_ms = millis(load_tick);
        let monitor_ms = millis(monitor_interval);
        Self {
            load_tick_ms,
            monitor_ms,
            duration_ms: millis(duration),
            next_load_ms: load_tick_ms,
            next_monitor_ms: monitor_ms,
        }
    }

    /// Total virtual time covered (ms).
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Advances to the next timer firing.
    ///
    /// # Returns
    ///
    /// * `Some((at_ms, event))` - The virtual instant and the job due then
    /// * `None` - If no timer fires before the end of the run
    pub fn tick(&mut self) -> Option<(u64, TimerEvent)> {
        let load_due = self.load_tick_ms > 0 && self.next_load_ms <= self.duration_ms;
        let monitor_due = self.monitor_ms > 0 && self.next_monitor_ms <= self.duration_ms;

        match (load_due, monitor_due) {
            (true, true) if self.next_load_ms <= self.next_monitor_ms => Some(self.fire_load()),
            (true, false) => Some(self.fire_load()),
            (_, true) => {
                let at = self.next_monitor_ms;
                self.next_monitor_ms = self.next_monitor_ms.saturating_add(self.monitor_ms);
                Some((at, TimerEvent::MonitorScan))
            }
            (false, false) => None,
        }
    }

    fn fire_load(&mut self) -> (u64, TimerEvent) {
        let at = self.next_load_ms;
        self.next_load_ms = self.next_load_ms.saturating_add(self.load_tick_ms);
        (at, TimerEvent::LoadTick)
    }

    /// Runs a function for each remaining timer firing.
    ///
    /// # Arguments
    ///
    /// * `f` - Called with the virtual instant (ms) and the job due
    pub fn run(&mut self, mut f: impl FnMut(u64, TimerEvent)) {
        while let Some((at, event)) = self.tick() {
            f(at, event);
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
