//! Shared test fixtures for integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use grid_command_center::GridService;
use grid_command_center::beckn::gateway::{MockGateway, ProtocolGateway};
use grid_command_center::beckn::types::{
    BecknContext, DerResource, FulfillmentType, FulfillmentWindow, Order, Quantity, SelectionAck,
    Stage, StageOutcome,
};
use grid_command_center::config::ScenarioConfig;
use grid_command_center::service::ActivationRequest;

/// Two feeders, seed 42: `F-1234` starts critical (87.5 of 95 kW, 92.1%),
/// `F-5678` starts normal (40 of 90 kW).
pub fn two_feeder_config() -> ScenarioConfig {
    let toml = r#"
[simulation]
seed = 42

[[feeders]]
id = "F-1234"
substation_name = "Westminster Substation"
base_load_kw = 87.5
capacity_kw = 95.0

[[feeders]]
id = "F-5678"
substation_name = "Camden Substation"
base_load_kw = 40.0
capacity_kw = 90.0
"#;
    ScenarioConfig::from_toml_str(toml).expect("two-feeder scenario should parse")
}

/// Service over `config` with the sandbox gateway the config describes.
pub fn service(config: &ScenarioConfig) -> Arc<GridService> {
    Arc::new(GridService::from_config(config).expect("service should build"))
}

/// Service over `config` talking to `gateway` instead of the sandbox.
pub fn service_with_gateway(
    config: &ScenarioConfig,
    gateway: Arc<dyn ProtocolGateway>,
) -> Arc<GridService> {
    let state = config.build_state().expect("state should build");
    Arc::new(GridService::new(state, gateway, config.service_settings()))
}

/// Explicit activation of `kw` against `feeder`, no delivery window.
pub fn activation(feeder: &str, kw: f32) -> ActivationRequest {
    ActivationRequest {
        feeder_id: feeder.to_string(),
        quantity: Quantity::kw(kw),
        window: None,
    }
}

/// Sandbox gateway that records every stage it is asked to run.
pub struct RecordingGateway {
    inner: MockGateway,
    calls: Mutex<Vec<Stage>>,
}

impl RecordingGateway {
    pub fn new(inner: MockGateway) -> Arc<Self> {
        Arc::new(Self {
            inner,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Stages called so far, in call order.
    pub fn calls(&self) -> Vec<Stage> {
        self.calls.lock().clone()
    }

    /// Order as tracked by the wrapped sandbox.
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.inner.order(order_id)
    }

    fn record(&self, stage: Stage) {
        self.calls.lock().push(stage);
    }
}

#[async_trait]
impl ProtocolGateway for RecordingGateway {
    async fn search(
        &self,
        ctx: &BecknContext,
        fulfillment: FulfillmentType,
        quantity: Option<Quantity>,
    ) -> StageOutcome<Vec<DerResource>> {
        self.record(Stage::Search);
        self.inner.search(ctx, fulfillment, quantity).await
    }

    async fn select(
        &self,
        ctx: &BecknContext,
        provider_id: &str,
        quantity: Quantity,
    ) -> StageOutcome<SelectionAck> {
        self.record(Stage::Select);
        self.inner.select(ctx, provider_id, quantity).await
    }

    async fn init(
        &self,
        ctx: &BecknContext,
        provider_id: &str,
        window: FulfillmentWindow,
    ) -> StageOutcome<Order> {
        self.record(Stage::Init);
        self.inner.init(ctx, provider_id, window).await
    }

    async fn confirm(
        &self,
        ctx: &BecknContext,
        order_id: &str,
        provider_id: &str,
    ) -> StageOutcome<Order> {
        self.record(Stage::Confirm);
        self.inner.confirm(ctx, order_id, provider_id).await
    }

    async fn status(&self, ctx: &BecknContext, order_id: &str) -> StageOutcome<Order> {
        self.record(Stage::Status);
        self.inner.status(ctx, order_id).await
    }

    async fn cancel(&self, ctx: &BecknContext, order_id: &str) -> StageOutcome<Order> {
        self.record(Stage::Cancel);
        self.inner.cancel(ctx, order_id).await
    }
}
