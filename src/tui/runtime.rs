//! Dashboard application state driving the engine in scaled virtual time.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Runtime;

use crate::audit::AuditEntry;
use crate::config::ScenarioConfig;
use crate::grid::state::FeederSnapshot;
use crate::service::{GridService, PendingRequest};
use crate::sim::clock::{Clock, TimerEvent};
use crate::sim::engine::Engine;
use crate::sim::types::RunEvent;

/// Redraw interval (wall clock).
pub const FRAME_MS: u64 = 100;

/// Virtual-time multipliers (slowest → fastest).
const SPEED_LEVELS: [u32; 6] = [1, 2, 5, 10, 30, 60];

/// Default speed index (5×).
const DEFAULT_SPEED_IDX: usize = 2;

/// Number of event lines kept for the log panel.
const MAX_EVENTS: usize = 200;

/// TUI application state.
pub struct App {
    rt: Runtime,
    engine: Engine,
    clock: Clock,
    /// Next firing pulled from the clock but not yet due.
    due: Option<(u64, TimerEvent)>,
    scenario: ScenarioConfig,
    /// Virtual time reached (ms).
    pub virtual_ms: u64,
    /// Whether the simulation is paused.
    pub paused: bool,
    /// Current index into `SPEED_LEVELS`.
    pub speed_idx: usize,
    /// Row selected in the feeder table.
    pub selected: usize,
    /// Whether the user has requested quit.
    pub quit: bool,
    /// When the last frame advanced the simulation.
    pub last_tick: Instant,
    /// Name of the active preset.
    pub preset_name: String,
    /// Result of the last operator action.
    pub status_line: String,
}

impl App {
    /// Creates an app from a scenario.
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the async runtime cannot start or the
    /// scenario's feeders are invalid.
    pub fn new(scenario: ScenarioConfig, preset_name: &str) -> io::Result<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (engine, clock) = build(&scenario)?;
        Ok(Self {
            rt,
            engine,
            clock,
            due: None,
            scenario,
            virtual_ms: 0,
            paused: false,
            speed_idx: DEFAULT_SPEED_IDX,
            selected: 0,
            quit: false,
            last_tick: Instant::now(),
            preset_name: preset_name.to_string(),
            status_line: String::from("ready"),
        })
    }

    fn service(&self) -> &GridService {
        self.engine.service()
    }

    /// Advances virtual time by one frame at the current speed and runs
    /// every job that falls due.
    pub fn tick(&mut self) {
        let step_ms = FRAME_MS * u64::from(self.speed());
        self.advance(step_ms);
    }

    /// Advances virtual time by `ms`, running due jobs in clock order.
    pub fn advance(&mut self, ms: u64) {
        let until = self.virtual_ms.saturating_add(ms);
        loop {
            let next = match self.due.take().or_else(|| self.clock.tick()) {
                Some(next) => next,
                None => break,
            };
            if next.0 > until {
                self.due = Some(next);
                break;
            }
            let (at, event) = next;
            self.rt.block_on(self.engine.step(at, event));
        }
        self.virtual_ms = until;
    }

    pub fn speed(&self) -> u32 {
        SPEED_LEVELS[self.speed_idx]
    }

    /// Toggles pause/resume.
    pub fn toggle_pause(&mut self) {
        self.paused = !self.paused;
    }

    /// Increases virtual-time speed.
    pub fn speed_up(&mut self) {
        if self.speed_idx + 1 < SPEED_LEVELS.len() {
            self.speed_idx += 1;
        }
    }

    /// Decreases virtual-time speed.
    pub fn speed_down(&mut self) {
        if self.speed_idx > 0 {
            self.speed_idx -= 1;
        }
    }

    pub fn select_next(&mut self) {
        let count = self.scenario.feeders.len();
        if count > 0 {
            self.selected = (self.selected + 1) % count;
        }
    }

    pub fn select_prev(&mut self) {
        let count = self.scenario.feeders.len();
        if count > 0 {
            self.selected = (self.selected + count - 1) % count;
        }
    }

    fn selected_id(&self) -> Option<String> {
        self.scenario.feeders.get(self.selected).map(|f| f.id.clone())
    }

    /// Confirms the selected feeder's pending request.
    pub fn confirm_selected(&mut self) {
        let Some(id) = self.selected_id() else {
            return;
        };
        let service = self.engine.service().clone();
        self.status_line = match self.rt.block_on(service.confirm_auto_activation(&id)) {
            Ok(acts) => format!("{id}: {} DER(s) activated", acts.len()),
            Err(err) => format!("{id}: {err}"),
        };
    }

    /// Dismisses the selected feeder's pending request.
    pub fn dismiss_selected(&mut self) {
        let Some(id) = self.selected_id() else {
            return;
        };
        self.status_line = match self.service().dismiss_auto_activation(&id) {
            Ok(true) => format!("{id}: request dismissed"),
            Ok(false) => format!("{id}: nothing to dismiss"),
            Err(err) => format!("{id}: {err}"),
        };
    }

    /// Releases every DER on the selected feeder.
    pub fn stand_down_selected(&mut self) {
        let Some(id) = self.selected_id() else {
            return;
        };
        self.status_line = match self.service().stand_down(&id) {
            Ok(released) => format!("{id}: released {} DER(s)", released.len()),
            Err(err) => format!("{id}: {err}"),
        };
    }

    /// Switches to a different preset, resetting simulation state.
    pub fn switch_preset(&mut self, name: &str) {
        let Ok(scenario) = ScenarioConfig::from_preset(name) else {
            return;
        };
        self.reset(scenario, name);
    }

    /// Restarts the current scenario from the beginning.
    pub fn restart(&mut self) {
        let scenario = self.scenario.clone();
        let name = self.preset_name.clone();
        self.reset(scenario, &name);
    }

    fn reset(&mut self, scenario: ScenarioConfig, name: &str) {
        match build(&scenario) {
            Ok((engine, clock)) => {
                self.engine = engine;
                self.clock = clock;
                self.due = None;
                self.scenario = scenario;
                self.virtual_ms = 0;
                self.selected = 0;
                self.paused = false;
                self.preset_name = name.to_string();
                self.status_line = format!("loaded {name}");
            }
            Err(err) => self.status_line = format!("cannot load {name}: {err}"),
        }
    }

    pub fn feeders(&self) -> Vec<FeederSnapshot> {
        self.service().feeders()
    }

    pub fn pending(&self) -> Vec<PendingRequest> {
        self.service().pending_requests()
    }

    /// Most recent audit entries, newest first.
    pub fn audit_tail(&self, n: usize) -> Vec<AuditEntry> {
        self.service().audit().latest(n)
    }

    /// Most recent event lines, oldest first.
    pub fn recent_events(&self) -> &[RunEvent] {
        self.engine.events()
    }
}

fn build(scenario: &ScenarioConfig) -> io::Result<(Engine, Clock)> {
    let service = GridService::from_config(scenario)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    let engine = Engine::new(Arc::new(service))
        .with_row_history(false)
        .with_event_limit(MAX_EVENTS);
    let clock = Clock::new(scenario.load_tick(), scenario.monitor_interval(), Duration::MAX);
    Ok((engine, clock))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(preset: &str) -> App {
        let cfg = ScenarioConfig::from_preset(preset).expect("preset");
        App::new(cfg, preset).expect("app")
    }

    #[test]
    fn advance_runs_due_jobs() {
        let mut app = app("london");
        app.advance(2999);
        assert_eq!(app.service().with_state(|s| s.cycle()), 0);
        app.advance(1);
        assert_eq!(app.service().with_state(|s| s.cycle()), 1);
        assert_eq!(app.virtual_ms, 3000);
    }

    #[test]
    fn stressed_flags_then_confirm() {
        let mut app = app("stressed");
        app.advance(5000);
        assert!(!app.pending().is_empty());

        let flagged = app.pending()[0].feeder_id.clone();
        app.selected = app
            .feeders()
            .iter()
            .position(|f| f.id == flagged)
            .expect("flagged feeder");
        app.confirm_selected();
        assert!(app.status_line.contains("DER(s) activated"));
        assert!(app.pending().iter().all(|p| p.feeder_id != flagged));
    }

    #[test]
    fn speed_controls_stay_in_bounds() {
        let mut app = app("london");
        for _ in 0..10 {
            app.speed_down();
        }
        assert_eq!(app.speed(), 1);
        for _ in 0..10 {
            app.speed_up();
        }
        assert_eq!(app.speed_idx, SPEED_LEVELS.len() - 1);
    }

    #[test]
    fn selection_wraps() {
        let mut app = app("london");
        app.select_prev();
        assert_eq!(app.selected, 5);
        app.select_next();
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn restart_resets_state() {
        let mut app = app("stressed");
        app.advance(10_000);
        app.restart();
        assert_eq!(app.virtual_ms, 0);
        assert_eq!(app.service().with_state(|s| s.cycle()), 0);
        assert!(app.recent_events().is_empty());
        assert_eq!(app.preset_name, "stressed");
    }

    #[test]
    fn history_stays_bounded_over_a_long_session() {
        let mut app = app("stressed");
        for _ in 0..120 {
            app.advance(5000);
            for request in app.pending() {
                let _ = app.service().dismiss_auto_activation(&request.feeder_id);
            }
        }
        assert_eq!(app.service().with_state(|s| s.cycle()), 200);
        assert!(app.engine.rows().is_empty());
        assert!(app.recent_events().len() <= MAX_EVENTS);
    }

    #[test]
    fn toggle_pause() {
        let mut app = app("london");
        assert!(!app.paused);
        app.toggle_pause();
        assert!(app.paused);
    }
}
