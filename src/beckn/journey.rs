//! Fulfillment journey state machine.
//!
//! A journey walks `search -> select -> init -> confirm -> status` strictly in
//! order. Any failing stage moves it to `Failed`, which is terminal. `cancel`
//! is only accepted once the order is confirmed.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::gateway::ProtocolGateway;
use super::types::{
    BapIdentity, BecknContext, DerResource, FulfillmentType, FulfillmentWindow, Order,
    OrderState, Quantity, Selection, SelectionAck, Stage, StageOutcome,
};
use crate::error::JourneyError;

/// What to do with an allocated order when a later stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compensation {
    /// Leave the order as it is.
    None,
    /// Best-effort cancel of the order.
    #[default]
    Cancel,
}

/// Static settings shared by every journey.
#[derive(Debug, Clone)]
pub struct JourneySettings {
    pub bap: BapIdentity,
    pub stage_timeout: Duration,
    pub compensation: Compensation,
    /// Length of the delivery window requested at init.
    pub window_minutes: i64,
}

impl Default for JourneySettings {
    fn default() -> Self {
        Self {
            bap: BapIdentity::default(),
            stage_timeout: Duration::from_millis(2000),
            compensation: Compensation::Cancel,
            window_minutes: 60,
        }
    }
}

/// Input for one activation attempt.
#[derive(Debug, Clone)]
pub struct JourneyRequest {
    pub fulfillment: FulfillmentType,
    pub quantity: Quantity,
    pub selection: Selection,
    /// Defaults to a window starting now.
    pub window: Option<FulfillmentWindow>,
}

impl JourneyRequest {
    pub fn new(fulfillment: FulfillmentType, quantity: Quantity) -> Self {
        Self {
            fulfillment,
            quantity,
            selection: Selection::First,
            window: None,
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }
}

/// Where a journey currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyPhase {
    Ready,
    Searched,
    Selected,
    Initialised,
    Confirmed,
    Verified,
    Cancelled,
    Failed,
}

impl JourneyPhase {
    /// The only stage allowed next on the happy path.
    fn next_stage(self) -> Option<Stage> {
        match self {
            Self::Ready => Some(Stage::Search),
            Self::Searched => Some(Stage::Select),
            Self::Selected => Some(Stage::Init),
            Self::Initialised => Some(Stage::Confirm),
            Self::Confirmed => Some(Stage::Status),
            Self::Verified | Self::Cancelled | Self::Failed => None,
        }
    }

    fn allows(self, stage: Stage) -> bool {
        match stage {
            Stage::Cancel => matches!(self, Self::Confirmed | Self::Verified),
            other => self.next_stage() == Some(other),
        }
    }
}

impl fmt::Display for JourneyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ready => "ready",
            Self::Searched => "searched",
            Self::Selected => "selected",
            Self::Initialised => "initialised",
            Self::Confirmed => "confirmed",
            Self::Verified => "verified",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Result of a completed journey.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyOutcome {
    pub transaction_id: String,
    pub provider: DerResource,
    pub selection: SelectionAck,
    /// Order as reported by the verifying status call.
    pub order: Order,
    pub stages: Vec<Stage>,
}

/// One activation attempt against a gateway.
pub struct Journey<'a> {
    gateway: &'a dyn ProtocolGateway,
    settings: &'a JourneySettings,
    transaction_id: String,
    phase: JourneyPhase,
    completed: Vec<Stage>,
    catalog: Vec<DerResource>,
    provider: Option<DerResource>,
    selection: Option<SelectionAck>,
    order: Option<Order>,
    compensated: Option<String>,
}

impl<'a> Journey<'a> {
    pub fn new(gateway: &'a dyn ProtocolGateway, settings: &'a JourneySettings) -> Self {
        Self {
            gateway,
            settings,
            transaction_id: Uuid::new_v4().to_string(),
            phase: JourneyPhase::Ready,
            completed: Vec::new(),
            catalog: Vec::new(),
            provider: None,
            selection: None,
            order: None,
            compensated: None,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn phase(&self) -> JourneyPhase {
        self.phase
    }

    /// Stages that completed successfully, in order.
    pub fn completed(&self) -> &[Stage] {
        &self.completed
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn selection(&self) -> Option<&SelectionAck> {
        self.selection.as_ref()
    }

    /// Order id cancelled by compensation after a failure, if any.
    pub fn compensated(&self) -> Option<&str> {
        self.compensated.as_deref()
    }

    fn context(&self, stage: Stage) -> BecknContext {
        BecknContext::new(stage, &self.transaction_id, &self.settings.bap)
    }

    fn enter(&self, stage: Stage) -> Result<(), JourneyError> {
        if self.phase.allows(stage) {
            Ok(())
        } else {
            Err(JourneyError::OutOfOrder {
                phase: self.phase.to_string(),
                attempted: stage,
            })
        }
    }

    fn advance(&mut self, stage: Stage, phase: JourneyPhase) {
        info!(txn = %self.transaction_id, %stage, "journey stage completed");
        self.completed.push(stage);
        self.phase = phase;
    }

    fn fail(&mut self, err: JourneyError) -> JourneyError {
        warn!(txn = %self.transaction_id, error = %err, "journey aborted");
        self.phase = JourneyPhase::Failed;
        err
    }

    /// Discovers providers.
    ///
    /// # Errors
    ///
    /// `JourneyError::NoProviders` on an empty catalog, plus the common stage
    /// errors (`OutOfOrder`, `StageFailed`, `Timeout`).
    pub async fn search(
        &mut self,
        fulfillment: FulfillmentType,
        quantity: Option<Quantity>,
    ) -> Result<&[DerResource], JourneyError> {
        self.enter(Stage::Search)?;
        let ctx = self.context(Stage::Search);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Search,
            JourneyError::NoProviders,
            gateway.search(&ctx, fulfillment, quantity),
        )
        .await;
        match outcome {
            Ok(found) if !found.is_empty() => {
                self.catalog = found;
                self.advance(Stage::Search, JourneyPhase::Searched);
                Ok(self.catalog.as_slice())
            }
            Ok(_) => Err(self.fail(JourneyError::NoProviders)),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Picks a provider from the search result and requests a quote.
    ///
    /// # Errors
    ///
    /// `JourneyError::ProviderNotFound` if the selection matches nothing.
    pub async fn select(
        &mut self,
        selection: &Selection,
        quantity: Quantity,
    ) -> Result<&SelectionAck, JourneyError> {
        self.enter(Stage::Select)?;
        let Some(provider) = selection.pick(&self.catalog).cloned() else {
            let wanted = match selection {
                Selection::Resource(id) => id.clone(),
                Selection::First => "<first>".to_string(),
            };
            return Err(self.fail(JourneyError::ProviderNotFound(wanted)));
        };

        let ctx = self.context(Stage::Select);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Select,
            JourneyError::ProviderNotFound(provider.id.clone()),
            gateway.select(&ctx, &provider.id, quantity),
        )
        .await;
        match outcome {
            Ok(ack) => {
                info!(txn = %self.transaction_id, provider = %provider.id, quote = %ack.quote.price.value, "provider selected");
                self.provider = Some(provider);
                self.advance(Stage::Select, JourneyPhase::Selected);
                Ok(&*self.selection.insert(ack))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Allocates an order in `DRAFT` for the selected provider.
    ///
    /// # Errors
    ///
    /// Common stage errors, or `ProviderNotFound` if the gateway rejects the provider.
    pub async fn init(&mut self, window: FulfillmentWindow) -> Result<&Order, JourneyError> {
        self.enter(Stage::Init)?;
        let provider_id = self.provider_id();
        let ctx = self.context(Stage::Init);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Init,
            JourneyError::ProviderNotFound(provider_id.clone()),
            gateway.init(&ctx, &provider_id, window),
        )
        .await;
        match outcome {
            Ok(order) => {
                info!(txn = %self.transaction_id, order = %order.id, "order initialised");
                self.advance(Stage::Init, JourneyPhase::Initialised);
                Ok(&*self.order.insert(order))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Confirms the allocated order.
    ///
    /// # Errors
    ///
    /// Common stage errors, or `OrderNotFound`.
    pub async fn confirm(&mut self) -> Result<&Order, JourneyError> {
        self.enter(Stage::Confirm)?;
        let (order_id, provider_id) = (self.order_id(), self.provider_id());
        let ctx = self.context(Stage::Confirm);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Confirm,
            JourneyError::OrderNotFound(order_id.clone()),
            gateway.confirm(&ctx, &order_id, &provider_id),
        )
        .await;
        self.record_order(Stage::Confirm, JourneyPhase::Confirmed, outcome)
    }

    /// Verifies the confirmed order is active.
    ///
    /// # Errors
    ///
    /// Common stage errors, or `StageFailed` if the order is not `ACTIVE`.
    pub async fn verify(&mut self) -> Result<&Order, JourneyError> {
        self.enter(Stage::Status)?;
        let order_id = self.order_id();
        let ctx = self.context(Stage::Status);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Status,
            JourneyError::OrderNotFound(order_id.clone()),
            gateway.status(&ctx, &order_id),
        )
        .await
        .and_then(|order| {
            if order.state == OrderState::Active {
                Ok(order)
            } else {
                Err(JourneyError::StageFailed {
                    stage: Stage::Status,
                    reason: format!("order {} is {}", order.id, order.state),
                })
            }
        });
        self.record_order(Stage::Status, JourneyPhase::Verified, outcome)
    }

    /// Cancels a confirmed order.
    ///
    /// # Errors
    ///
    /// `OutOfOrder` before confirmation, plus the common stage errors.
    pub async fn cancel(&mut self) -> Result<&Order, JourneyError> {
        self.enter(Stage::Cancel)?;
        let order_id = self.order_id();
        let ctx = self.context(Stage::Cancel);
        let gateway = self.gateway;
        let outcome = timed(
            self.settings.stage_timeout,
            Stage::Cancel,
            JourneyError::OrderNotFound(order_id.clone()),
            gateway.cancel(&ctx, &order_id),
        )
        .await;
        self.record_order(Stage::Cancel, JourneyPhase::Cancelled, outcome)
    }

    fn record_order(
        &mut self,
        stage: Stage,
        phase: JourneyPhase,
        outcome: Result<Order, JourneyError>,
    ) -> Result<&Order, JourneyError> {
        match outcome {
            Ok(order) => {
                self.advance(stage, phase);
                Ok(&*self.order.insert(order))
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn provider_id(&self) -> String {
        self.provider
            .as_ref()
            .map(|p| p.id.clone())
            .unwrap_or_default()
    }

    fn order_id(&self) -> String {
        self.order.as_ref().map(|o| o.id.clone()).unwrap_or_default()
    }

    /// Runs the whole happy path.
    ///
    /// If a stage after `init` fails and compensation is enabled, the
    /// allocated order is cancelled on a best-effort basis; the original
    /// error is still returned.
    ///
    /// # Errors
    ///
    /// The first stage error encountered.
    pub async fn run(&mut self, request: &JourneyRequest) -> Result<JourneyOutcome, JourneyError> {
        info!(
            txn = %self.transaction_id,
            quantity = request.quantity.amount,
            "starting fulfillment journey"
        );
        let result = self.run_stages(request).await;
        if result.is_err() {
            self.compensate().await;
        }
        result
    }

    async fn run_stages(&mut self, request: &JourneyRequest) -> Result<JourneyOutcome, JourneyError> {
        self.search(request.fulfillment, Some(request.quantity))
            .await?;
        self.select(&request.selection, request.quantity).await?;
        let window = request
            .window
            .unwrap_or_else(|| FulfillmentWindow::starting_now(self.settings.window_minutes));
        self.init(window).await?;
        self.confirm().await?;
        let order = self.verify().await?.clone();

        Ok(JourneyOutcome {
            transaction_id: self.transaction_id.clone(),
            provider: self.provider.clone().ok_or_else(|| {
                JourneyError::ProviderNotFound("<selected>".to_string())
            })?,
            selection: self
                .selection
                .clone()
                .ok_or_else(|| JourneyError::ProviderNotFound("<selected>".to_string()))?,
            order,
            stages: self.completed.clone(),
        })
    }

    async fn compensate(&mut self) {
        if self.settings.compensation == Compensation::None {
            return;
        }
        let Some(order) = self.order.as_ref() else {
            return;
        };
        if order.state.is_terminal() {
            return;
        }
        let order_id = order.id.clone();
        let ctx = self.context(Stage::Cancel);
        let cancelled = tokio::time::timeout(
            self.settings.stage_timeout,
            self.gateway.cancel(&ctx, &order_id),
        )
        .await;
        match cancelled {
            Ok(StageOutcome::Found(order)) => {
                info!(txn = %self.transaction_id, order = %order_id, "compensating cancel issued");
                self.order = Some(order);
                self.compensated = Some(order_id);
            }
            Ok(StageOutcome::NotFound) | Ok(StageOutcome::Failed(_)) | Err(_) => {
                warn!(txn = %self.transaction_id, order = %order_id, "compensating cancel failed");
            }
        }
    }
}

/// Awaits a stage call under a timeout and maps its outcome.
async fn timed<T, F>(
    timeout: Duration,
    stage: Stage,
    not_found: JourneyError,
    call: F,
) -> Result<T, JourneyError>
where
    F: Future<Output = StageOutcome<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Err(_) => Err(JourneyError::Timeout {
            stage,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
        Ok(StageOutcome::Found(value)) => Ok(value),
        Ok(StageOutcome::NotFound) => Err(not_found),
        Ok(StageOutcome::Failed(reason)) => Err(JourneyError::StageFailed { stage, reason }),
    }
}
