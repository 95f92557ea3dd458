//! Request-triggered grid operations over one shared [`GridState`].
//!
//! All state mutation goes through a single `RwLock`; the lock is only held
//! inside synchronous closures, never across a gateway call.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLog, AuditStatus};
use crate::beckn::gateway::ProtocolGateway;
use crate::beckn::journey::{Journey, JourneyOutcome, JourneyRequest, JourneySettings};
use crate::beckn::types::{
    BecknContext, DerResource, FulfillmentType, FulfillmentWindow, Order, OrderState, Quantity,
    Quote, Selection, SelectionAck, Stage, StageOutcome,
};
use crate::config::ScenarioConfig;
use crate::error::{GridError, JourneyError, Result};
use crate::grid::monitor::{self, ScanReport};
use crate::grid::registry::ActiveDer;
use crate::grid::state::{FeederSnapshot, GridState};

const OPERATOR: &str = "operator";
const SYSTEM: &str = "system";

/// Knobs for request-triggered operations.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub journey: JourneySettings,
    pub fulfillment: FulfillmentType,
    /// DERs activated when an operator confirms a pending request.
    pub auto_der_count: usize,
    /// Output cap per DER for confirmed requests (kW).
    pub auto_max_output_kw: f32,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            journey: JourneySettings::default(),
            fulfillment: FulfillmentType::EnergyDispatch,
            auto_der_count: 2,
            auto_max_output_kw: 15.0,
        }
    }
}

/// Parameters of an explicit DER activation.
#[derive(Debug, Clone)]
pub struct ActivationRequest {
    pub feeder_id: String,
    pub quantity: Quantity,
    pub window: Option<FulfillmentWindow>,
}

/// A DER attributed to a feeder after a successful journey.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activation {
    pub order_id: String,
    pub der_id: String,
    pub feeder_id: String,
    pub status: OrderState,
    pub output: f32,
    pub transaction_id: String,
    pub quote: Quote,
}

/// A feeder awaiting operator confirmation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRequest {
    pub feeder_id: String,
    pub feeder_name: String,
    pub current_load: f32,
    pub capacity: f32,
    pub load_percent: f32,
}

/// Owner of grid state, the protocol gateway and the audit trail.
pub struct GridService {
    state: RwLock<GridState>,
    gateway: Arc<dyn ProtocolGateway>,
    audit: AuditLog,
    settings: ServiceSettings,
}

impl GridService {
    pub fn new(
        state: GridState,
        gateway: Arc<dyn ProtocolGateway>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            state: RwLock::new(state),
            gateway,
            audit: AuditLog::default(),
            settings,
        }
    }

    /// Builds state, sandbox gateway and settings from a scenario.
    ///
    /// # Errors
    ///
    /// Returns `GridError::InvalidFeeder` if a feeder definition is invalid.
    pub fn from_config(config: &ScenarioConfig) -> Result<Self> {
        Ok(Self::new(
            config.build_state()?,
            Arc::new(config.build_gateway()),
            config.service_settings(),
        ))
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn audit_logs(&self) -> Vec<AuditEntry> {
        self.audit.entries()
    }

    /// Runs `f` against a consistent read view of the state.
    pub fn with_state<R>(&self, f: impl FnOnce(&GridState) -> R) -> R {
        f(&self.state.read())
    }

    /// Runs `f` with exclusive access to the state.
    pub fn with_state_mut<R>(&self, f: impl FnOnce(&mut GridState) -> R) -> R {
        f(&mut self.state.write())
    }

    /// One load tick. Returns the new cycle number.
    pub fn tick_load(&self) -> u64 {
        self.with_state_mut(GridState::tick_load)
    }

    /// One control-loop scan, with its decisions written to the audit trail.
    pub fn run_monitor(&self) -> ScanReport {
        let report = self.with_state_mut(monitor::scan);

        for sd in &report.stood_down {
            for der in &sd.released {
                self.audit.record(
                    "Auto-Deactivation",
                    SYSTEM,
                    &sd.feeder_id,
                    AuditStatus::Success,
                    format!(
                        "Load at {:.1}% below threshold, released {} ({:.1} kW, order {})",
                        sd.load_percent, der.der_id, der.output_kw, der.order_id
                    ),
                );
            }
        }
        for feeder_id in &report.flagged {
            self.audit.record(
                "Auto-Activation Request",
                SYSTEM,
                feeder_id,
                AuditStatus::Info,
                "Critical load with no active DERs, awaiting confirmation",
            );
        }
        for err in &report.errors {
            self.audit
                .record("Monitor Error", SYSTEM, "grid", AuditStatus::Error, err.to_string());
        }
        report
    }

    pub fn feeders(&self) -> Vec<FeederSnapshot> {
        self.with_state(GridState::snapshot)
    }

    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn feeder(&self, feeder_id: &str) -> Result<FeederSnapshot> {
        self.feeders()
            .into_iter()
            .find(|f| f.id == feeder_id)
            .ok_or_else(|| GridError::FeederNotFound(feeder_id.to_string()))
    }

    pub fn active_ders(&self) -> Vec<ActiveDer> {
        self.with_state(|s| s.registry().list_all())
    }

    pub fn pending_requests(&self) -> Vec<PendingRequest> {
        self.with_state(|s| {
            s.pending()
                .into_iter()
                .filter_map(|id| {
                    let f = s.feeder(&id).ok()?;
                    Some(PendingRequest {
                        feeder_id: id,
                        feeder_name: f.name().to_string(),
                        current_load: f.current_load_kw(),
                        capacity: f.capacity_kw(),
                        load_percent: f.load_pct(),
                    })
                })
                .collect()
        })
    }

    fn journey(&self) -> Journey<'_> {
        Journey::new(self.gateway.as_ref(), &self.settings.journey)
    }

    /// Runs only the search stage.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` if discovery fails or finds nothing.
    pub async fn search(
        &self,
        fulfillment: FulfillmentType,
        quantity: Option<Quantity>,
    ) -> Result<Vec<DerResource>> {
        let mut journey = self.journey();
        let found = journey.search(fulfillment, quantity).await?.to_vec();
        Ok(found)
    }

    /// Searches, then requests a quote for one resource.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` if either stage fails.
    pub async fn select(&self, der_id: &str, quantity: Quantity) -> Result<SelectionAck> {
        self.prepare(&Selection::Resource(der_id.to_string()), quantity)
            .await
    }

    /// Searches and obtains a quote without allocating an order.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` if either stage fails.
    pub async fn prepare(&self, selection: &Selection, quantity: Quantity) -> Result<SelectionAck> {
        let mut journey = self.journey();
        journey
            .search(self.settings.fulfillment, Some(quantity))
            .await?;
        let ack = journey.select(selection, quantity).await?.clone();
        Ok(ack)
    }

    /// Runs a full journey without attributing the order to any feeder.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` if a stage fails.
    pub async fn run_journey(&self, request: &JourneyRequest) -> Result<JourneyOutcome> {
        let mut journey = self.journey();
        match journey.run(request).await {
            Ok(outcome) => {
                self.audit.record(
                    "Beckn Journey",
                    OPERATOR,
                    &outcome.order.id,
                    AuditStatus::Success,
                    format!("Order {} confirmed with {}", outcome.order.id, outcome.provider.id),
                );
                Ok(outcome)
            }
            Err(err) => {
                self.audit.record(
                    "Beckn Journey",
                    OPERATOR,
                    "grid",
                    AuditStatus::Error,
                    format!("Journey failed: {err}"),
                );
                Err(err.into())
            }
        }
    }

    /// Runs the full journey for one resource and attributes the order to a feeder.
    ///
    /// # Errors
    ///
    /// See [`GridService::activate`].
    pub async fn activate_der(
        &self,
        der_id: &str,
        request: ActivationRequest,
    ) -> Result<Activation> {
        self.activate(Selection::Resource(der_id.to_string()), request)
            .await
    }

    /// Runs the full journey and attributes the confirmed order to a feeder.
    ///
    /// # Errors
    ///
    /// - `GridError::FeederNotFound` before any stage runs
    /// - `GridError::InvalidOutput` for a negative or non-finite quantity
    /// - `GridError::Journey` if a stage fails
    /// - `GridError::DuplicateOrder` if the gateway reuses an active order id
    pub async fn activate(
        &self,
        selection: Selection,
        request: ActivationRequest,
    ) -> Result<Activation> {
        self.with_state(|s| s.feeder(&request.feeder_id).map(|_| ()))?;
        if !request.quantity.amount.is_finite() || request.quantity.amount < 0.0 {
            return Err(GridError::InvalidOutput(request.quantity.amount));
        }

        let journey_request = JourneyRequest {
            fulfillment: self.settings.fulfillment,
            quantity: request.quantity,
            selection,
            window: request.window,
        };
        self.activate_with(&journey_request, &request.feeder_id, request.quantity.amount, OPERATOR)
            .await
    }

    async fn activate_with(
        &self,
        journey_request: &JourneyRequest,
        feeder_id: &str,
        output_kw: f32,
        user: &str,
    ) -> Result<Activation> {
        let mut journey = self.journey();
        let outcome = match journey.run(journey_request).await {
            Ok(outcome) => outcome,
            Err(err) => {
                self.audit.record(
                    "DER Activation",
                    user,
                    feeder_id,
                    AuditStatus::Error,
                    format!("Journey failed: {err}"),
                );
                return Err(err.into());
            }
        };

        let attributed = self.with_state_mut(|s| {
            s.activate(&outcome.provider.id, feeder_id, output_kw, &outcome.order.id)
        });
        if let Err(err) = attributed {
            warn!(feeder = %feeder_id, order = %outcome.order.id, error = %err, "attribution failed, cancelling order");
            if let Err(cancel_err) = self.order_call(Stage::Cancel, &outcome.order.id).await {
                warn!(order = %outcome.order.id, error = %cancel_err, "compensating cancel failed");
                self.audit.record(
                    "DER Cancellation",
                    user,
                    feeder_id,
                    AuditStatus::Error,
                    format!("Cancel of order {} failed: {cancel_err}", outcome.order.id),
                );
            }
            self.audit.record(
                "DER Activation",
                user,
                feeder_id,
                AuditStatus::Error,
                err.to_string(),
            );
            return Err(err);
        }

        info!(
            feeder = %feeder_id,
            der = %outcome.provider.id,
            order = %outcome.order.id,
            output_kw,
            "DER activated"
        );
        self.audit.record(
            "DER Activation",
            user,
            feeder_id,
            AuditStatus::Success,
            format!(
                "Activated {} ({:.1} kW) via order {}",
                outcome.provider.name, output_kw, outcome.order.id
            ),
        );

        Ok(Activation {
            order_id: outcome.order.id,
            der_id: outcome.provider.id,
            feeder_id: feeder_id.to_string(),
            status: outcome.order.state,
            output: output_kw,
            transaction_id: outcome.transaction_id,
            quote: outcome.selection.quote,
        })
    }

    /// Removes an activation record. Unknown order ids are a no-op.
    pub fn deactivate(&self, order_id: &str) -> Option<ActiveDer> {
        let removed = self.with_state_mut(|s| s.deactivate(order_id));
        if let Some(der) = &removed {
            info!(feeder = %der.feeder_id, order = %order_id, "DER deactivated");
            self.audit.record(
                "DER Deactivation",
                OPERATOR,
                &der.feeder_id,
                AuditStatus::Success,
                format!("Released {} ({:.1} kW, order {order_id})", der.der_id, der.output_kw),
            );
        }
        removed
    }

    /// Stands down every DER on a feeder.
    ///
    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn stand_down(&self, feeder_id: &str) -> Result<Vec<ActiveDer>> {
        let released = self.with_state_mut(|s| s.deactivate_feeder(feeder_id))?;
        if !released.is_empty() {
            self.audit.record(
                "DER Deactivation",
                OPERATOR,
                feeder_id,
                AuditStatus::Success,
                format!("Manual stand-down released {} DER(s)", released.len()),
            );
        }
        Ok(released)
    }

    async fn order_call(
        &self,
        stage: Stage,
        order_id: &str,
    ) -> std::result::Result<Order, JourneyError> {
        let transaction_id = Uuid::new_v4().to_string();
        let ctx = BecknContext::new(stage, &transaction_id, &self.settings.journey.bap);
        let call = async {
            match stage {
                Stage::Cancel => self.gateway.cancel(&ctx, order_id).await,
                _ => self.gateway.status(&ctx, order_id).await,
            }
        };
        let timeout = self.settings.journey.stage_timeout;
        match tokio::time::timeout(timeout, call).await {
            Err(_) => Err(JourneyError::Timeout {
                stage,
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
            Ok(StageOutcome::Found(order)) => Ok(order),
            Ok(StageOutcome::NotFound) => Err(JourneyError::OrderNotFound(order_id.to_string())),
            Ok(StageOutcome::Failed(reason)) => Err(JourneyError::StageFailed { stage, reason }),
        }
    }

    /// Queries the gateway for an order's tracked state.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` with `OrderNotFound` for unknown orders.
    pub async fn order_status(&self, order_id: &str) -> Result<Order> {
        Ok(self.order_call(Stage::Status, order_id).await?)
    }

    /// Cancels an order with the gateway and releases its activation record.
    ///
    /// # Errors
    ///
    /// Returns `GridError::Journey` if the gateway rejects the cancel.
    pub async fn cancel_order(&self, order_id: &str) -> Result<Order> {
        let order = match self.order_call(Stage::Cancel, order_id).await {
            Ok(order) => order,
            Err(err) => {
                self.audit.record(
                    "Order Cancellation",
                    OPERATOR,
                    order_id,
                    AuditStatus::Error,
                    err.to_string(),
                );
                return Err(err.into());
            }
        };
        let released = self.with_state_mut(|s| s.deactivate(order_id));
        let target = released
            .as_ref()
            .map_or(order_id.to_string(), |d| d.feeder_id.clone());
        self.audit.record(
            "Order Cancellation",
            OPERATOR,
            &target,
            AuditStatus::Success,
            format!("Order {order_id} cancelled"),
        );
        Ok(order)
    }

    /// Confirms a pending auto-activation request.
    ///
    /// The flag is cleared before any journey runs. Each of the first
    /// `auto_der_count` catalog resources gets its own journey; individual
    /// failures are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `GridError::NotPending` if the feeder has no pending request
    /// - the last journey error if no DER could be activated
    pub async fn confirm_auto_activation(&self, feeder_id: &str) -> Result<Vec<Activation>> {
        self.with_state_mut(|s| {
            s.feeder(feeder_id)?;
            if s.clear_pending(feeder_id) {
                Ok(())
            } else {
                Err(GridError::NotPending(feeder_id.to_string()))
            }
        })?;
        info!(feeder = %feeder_id, "auto-activation confirmed");

        let catalog = match self.search(self.settings.fulfillment, None).await {
            Ok(catalog) => catalog,
            Err(err) => {
                self.audit.record(
                    "Auto-Activation",
                    OPERATOR,
                    feeder_id,
                    AuditStatus::Error,
                    err.to_string(),
                );
                return Err(err);
            }
        };

        let mut activations = Vec::new();
        let mut last_err = None;
        for resource in catalog.iter().take(self.settings.auto_der_count) {
            let output_kw = resource.capacity.min(self.settings.auto_max_output_kw);
            let request = JourneyRequest {
                fulfillment: self.settings.fulfillment,
                quantity: Quantity::kw(output_kw),
                selection: Selection::Resource(resource.id.clone()),
                window: None,
            };
            match self.activate_with(&request, feeder_id, output_kw, OPERATOR).await {
                Ok(activation) => activations.push(activation),
                Err(err) => {
                    warn!(feeder = %feeder_id, der = %resource.id, error = %err, "auto-activation of DER failed");
                    last_err = Some(err);
                }
            }
        }

        match (activations.is_empty(), last_err) {
            (true, Some(err)) => Err(err),
            _ => Ok(activations),
        }
    }

    /// Dismisses a pending request. Returns `false` if none was pending.
    ///
    /// # Errors
    ///
    /// Returns `GridError::FeederNotFound` for an unknown id.
    pub fn dismiss_auto_activation(&self, feeder_id: &str) -> Result<bool> {
        let was_pending = self.with_state_mut(|s| {
            s.feeder(feeder_id)?;
            Ok::<_, GridError>(s.clear_pending(feeder_id))
        })?;
        if was_pending {
            info!(feeder = %feeder_id, "auto-activation dismissed");
            self.audit.record(
                "Auto-Activation Dismissed",
                OPERATOR,
                feeder_id,
                AuditStatus::Info,
                "Operator dismissed the pending request",
            );
        }
        Ok(was_pending)
    }
}
