//! Headless simulation that replays the two periodic jobs in virtual time.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::clock::{Clock, TimerEvent};
use super::kpi::RunSummary;
use super::types::{EventKind, RunEvent, TelemetryRow};
use crate::service::GridService;

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub rows: Vec<TelemetryRow>,
    pub events: Vec<RunEvent>,
    pub summary: RunSummary,
}

/// Drives a [`GridService`] from a [`Clock`] instead of wall-clock tasks.
///
/// Optionally plays the operator: every pending request is confirmed right
/// after the scan that raised it.
///
/// A headless run keeps its whole history. Long-lived drivers such as the
/// dashboard turn row recording off and cap the event log.
pub struct Engine {
    service: Arc<GridService>,
    auto_confirm: bool,
    record_rows: bool,
    event_limit: Option<usize>,
    rows: Vec<TelemetryRow>,
    events: Vec<RunEvent>,
    /// Events pushed since construction, including evicted ones.
    pushed: usize,
}

impl Engine {
    pub fn new(service: Arc<GridService>) -> Self {
        Self {
            service,
            auto_confirm: false,
            record_rows: true,
            event_limit: None,
            rows: Vec::new(),
            events: Vec::new(),
            pushed: 0,
        }
    }

    /// Confirms pending requests automatically after each scan.
    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    /// Whether load ticks append telemetry rows.
    pub fn with_row_history(mut self, record_rows: bool) -> Self {
        self.record_rows = record_rows;
        self
    }

    /// Keeps only the newest `limit` events.
    pub fn with_event_limit(mut self, limit: usize) -> Self {
        self.event_limit = Some(limit);
        self.trim_events();
        self
    }

    pub fn service(&self) -> &Arc<GridService> {
        &self.service
    }

    pub fn rows(&self) -> &[TelemetryRow] {
        &self.rows
    }

    pub fn events(&self) -> &[RunEvent] {
        &self.events
    }

    /// Executes the job due at `at_ms`.
    ///
    /// # Returns
    ///
    /// The number of event lines the job added.
    pub async fn step(&mut self, at_ms: u64, event: TimerEvent) -> usize {
        let before = self.pushed;
        match event {
            TimerEvent::LoadTick => self.load_tick(at_ms),
            TimerEvent::MonitorScan => self.scan(at_ms).await,
        }
        self.pushed - before
    }

    /// Runs every job the clock yields and summarises the result.
    pub async fn run(mut self, mut clock: Clock) -> RunOutput {
        info!(
            duration_ms = clock.duration_ms(),
            auto_confirm = self.auto_confirm,
            "headless run started"
        );
        while let Some((at_ms, event)) = clock.tick() {
            self.step(at_ms, event).await;
        }

        let summary = RunSummary::from_run(&self.rows, &self.events);
        info!(
            ticks = summary.load_ticks,
            activations = summary.activations,
            stand_downs = summary.stand_downs,
            "headless run finished"
        );
        RunOutput {
            rows: self.rows,
            events: self.events,
            summary,
        }
    }

    fn load_tick(&mut self, at_ms: u64) {
        let cycle = self.service.tick_load();
        if !self.record_rows {
            return;
        }
        let snapshot = self.service.feeders();
        self.rows.extend(snapshot.into_iter().map(|f| TelemetryRow {
            time_ms: at_ms,
            cycle,
            feeder_id: f.id,
            target_kw: f.target_load,
            current_kw: f.current_load,
            load_pct: f.load_percent,
            status: f.status,
            active_ders: f.active_ders.len(),
            der_contribution_kw: f.active_der_contribution,
            pending: f.pending_auto_activation,
        }));
    }

    async fn scan(&mut self, at_ms: u64) {
        let report = self.service.run_monitor();

        for sd in report.stood_down {
            let ders: Vec<&str> = sd.released.iter().map(|d| d.der_id.as_str()).collect();
            self.push(
                at_ms,
                EventKind::StoodDown,
                sd.feeder_id,
                format!("load {:.1}%, released {}", sd.load_percent, ders.join(", ")),
            );
        }
        for feeder_id in report.flagged {
            let detail = self
                .service
                .feeder(&feeder_id)
                .map(|f| format!("load {:.1}%, awaiting confirmation", f.load_percent))
                .unwrap_or_default();
            self.push(at_ms, EventKind::Flagged, feeder_id, detail);
        }
        for feeder_id in report.cleared {
            self.push(at_ms, EventKind::Cleared, feeder_id, "no longer critical".to_string());
        }
        for err in report.errors {
            self.push(at_ms, EventKind::EvaluationError, "-".to_string(), err.to_string());
        }

        if self.auto_confirm {
            self.confirm_pending(at_ms).await;
        }
    }

    async fn confirm_pending(&mut self, at_ms: u64) {
        let service = self.service.clone();
        for request in service.pending_requests() {
            match service.confirm_auto_activation(&request.feeder_id).await {
                Ok(activations) => {
                    for a in activations {
                        self.push(
                            at_ms,
                            EventKind::Activated,
                            a.feeder_id,
                            format!("{} at {:.1} kW (order {})", a.der_id, a.output, a.order_id),
                        );
                    }
                }
                Err(err) => {
                    warn!(feeder = %request.feeder_id, error = %err, "auto-confirm failed");
                    self.push(
                        at_ms,
                        EventKind::JourneyFailed,
                        request.feeder_id,
                        err.to_string(),
                    );
                }
            }
        }
    }

    fn push(&mut self, time_ms: u64, kind: EventKind, feeder_id: String, detail: String) {
        let event = RunEvent {
            time_ms,
            kind,
            feeder_id,
            detail,
        };
        debug!(feeder = %event.feeder_id, kind = %event.kind, "{}", event.detail);
        self.events.push(event);
        self.pushed += 1;
        self.trim_events();
    }

    fn trim_events(&mut self) {
        if let Some(limit) = self.event_limit {
            let excess = self.events.len().saturating_sub(limit);
            self.events.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ScenarioConfig;

    fn engine(cfg: &ScenarioConfig, auto_confirm: bool) -> Engine {
        let service = GridService::from_config(cfg).expect("service");
        Engine::new(Arc::new(service)).with_auto_confirm(auto_confirm)
    }

    fn clock(cfg: &ScenarioConfig, secs: u64) -> Clock {
        Clock::new(cfg.load_tick(), cfg.monitor_interval(), Duration::from_secs(secs))
    }

    #[tokio::test]
    async fn rows_cover_every_feeder_every_tick() {
        let cfg = ScenarioConfig::london();
        let out = engine(&cfg, false).run(clock(&cfg, 30)).await;
        assert_eq!(out.summary.load_ticks, 10);
        assert_eq!(out.rows.len(), 10 * cfg.feeders.len());
        assert_eq!(out.rows[0].cycle, 1);
        assert_eq!(out.rows[0].time_ms, 3000);
    }

    #[tokio::test]
    async fn stressed_run_without_operator_only_flags() {
        let cfg = ScenarioConfig::stressed();
        let out = engine(&cfg, false).run(clock(&cfg, 60)).await;
        assert!(out.summary.flags > 0);
        assert_eq!(out.summary.activations, 0);
        assert!(out.rows.iter().all(|r| r.active_ders == 0));
    }

    #[tokio::test]
    async fn auto_confirm_activates_flagged_feeders() {
        let cfg = ScenarioConfig::stressed();
        let out = engine(&cfg, true).run(clock(&cfg, 60)).await;
        assert!(out.summary.activations > 0);
        let first_flag = out
            .events
            .iter()
            .position(|e| e.kind == EventKind::Flagged)
            .expect("a flag");
        let first_activation = out
            .events
            .iter()
            .position(|e| e.kind == EventKind::Activated)
            .expect("an activation");
        assert!(first_flag < first_activation);
    }

    #[tokio::test]
    async fn bounded_history_keeps_newest_events() {
        let cfg = ScenarioConfig::stressed();
        let full = engine(&cfg, false).run(clock(&cfg, 120)).await;
        assert!(!full.events.is_empty());
        let limit = full.events.len().div_ceil(2);

        let bounded = engine(&cfg, false)
            .with_row_history(false)
            .with_event_limit(limit)
            .run(clock(&cfg, 120))
            .await;
        assert!(bounded.rows.is_empty());
        assert_eq!(bounded.events, full.events[full.events.len() - limit..]);
    }

    #[tokio::test]
    async fn step_counts_events_past_the_limit() {
        let cfg = ScenarioConfig::stressed();
        let mut engine = engine(&cfg, false).with_event_limit(0);
        let mut clock = clock(&cfg, 60);
        let mut added = 0;
        while let Some((at_ms, event)) = clock.tick() {
            added += engine.step(at_ms, event).await;
        }
        assert!(added > 0);
        assert!(engine.events().is_empty());
    }

    #[tokio::test]
    async fn same_seed_same_run() {
        let cfg = ScenarioConfig::stressed();
        let a = engine(&cfg, false).run(clock(&cfg, 45)).await;
        let b = engine(&cfg, false).run(clock(&cfg, 45)).await;
        assert_eq!(a.rows, b.rows);
        assert_eq!(a.summary, b.summary);
    }
}
