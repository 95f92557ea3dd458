//! Protocol gateway seam and the in-process sandbox implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use super::types::{
    BecknContext, DerResource, DerType, FulfillmentType, FulfillmentWindow, Location, Order,
    OrderState, Price, Quantity, Quote, SelectionAck, Stage, StageOutcome,
};

/// The network side of a fulfillment journey.
///
/// Every call carries the context for its stage. Implementations report
/// outcomes as values; the journey decides what is fatal.
#[async_trait]
pub trait ProtocolGateway: Send + Sync {
    async fn search(
        &self,
        ctx: &BecknContext,
        fulfillment: FulfillmentType,
        quantity: Option<Quantity>,
    ) -> StageOutcome<Vec<DerResource>>;

    async fn select(
        &self,
        ctx: &BecknContext,
        provider_id: &str,
        quantity: Quantity,
    ) -> StageOutcome<SelectionAck>;

    async fn init(
        &self,
        ctx: &BecknContext,
        provider_id: &str,
        window: FulfillmentWindow,
    ) -> StageOutcome<Order>;

    async fn confirm(&self, ctx: &BecknContext, order_id: &str, provider_id: &str)
    -> StageOutcome<Order>;

    async fn status(&self, ctx: &BecknContext, order_id: &str) -> StageOutcome<Order>;

    async fn cancel(&self, ctx: &BecknContext, order_id: &str) -> StageOutcome<Order>;
}

/// Sandbox gateway with a fixed catalog and a real order book.
///
/// Orders move `DRAFT -> ACTIVE -> CANCELLED` as the stages are called, so
/// `status` reports the tracked state rather than a fixed echo.
#[derive(Debug)]
pub struct MockGateway {
    catalog: Vec<DerResource>,
    orders: Mutex<HashMap<String, Order>>,
    fail_at: Option<Stage>,
    latency: Option<Duration>,
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new(sandbox_catalog())
    }
}

impl MockGateway {
    pub fn new(catalog: Vec<DerResource>) -> Self {
        Self {
            catalog,
            orders: Mutex::new(HashMap::new()),
            fail_at: None,
            latency: None,
        }
    }

    /// Makes every call of `stage` report a failure.
    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn catalog(&self) -> &[DerResource] {
        &self.catalog
    }

    /// Tracked order, if the gateway issued it.
    pub fn order(&self, order_id: &str) -> Option<Order> {
        self.orders.lock().get(order_id).cloned()
    }

    async fn enter(&self, stage: Stage) -> Result<(), String> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail_at == Some(stage) {
            return Err(format!("sandbox rejected {stage}"));
        }
        Ok(())
    }

    fn transition(&self, order_id: &str, from: &[OrderState], to: OrderState) -> StageOutcome<Order> {
        let mut orders = self.orders.lock();
        let Some(order) = orders.get_mut(order_id) else {
            return StageOutcome::NotFound;
        };
        if !from.contains(&order.state) {
            return StageOutcome::Failed(format!(
                "order {order_id} is {}, cannot become {to}",
                order.state
            ));
        }
        order.state = to;
        StageOutcome::Found(order.clone())
    }
}

#[async_trait]
impl ProtocolGateway for MockGateway {
    async fn search(
        &self,
        _ctx: &BecknContext,
        _fulfillment: FulfillmentType,
        _quantity: Option<Quantity>,
    ) -> StageOutcome<Vec<DerResource>> {
        if let Err(reason) = self.enter(Stage::Search).await {
            return StageOutcome::Failed(reason);
        }
        let found: Vec<DerResource> = self
            .catalog
            .iter()
            .filter(|r| r.is_available())
            .cloned()
            .collect();
        if found.is_empty() {
            StageOutcome::NotFound
        } else {
            StageOutcome::Found(found)
        }
    }

    async fn select(
        &self,
        _ctx: &BecknContext,
        provider_id: &str,
        quantity: Quantity,
    ) -> StageOutcome<SelectionAck> {
        if let Err(reason) = self.enter(Stage::Select).await {
            return StageOutcome::Failed(reason);
        }
        let Some(resource) = self.catalog.iter().find(|r| r.id == provider_id) else {
            return StageOutcome::NotFound;
        };
        let unit_price = resource.price_per_unit.unwrap_or(0.0);
        StageOutcome::Found(SelectionAck {
            selection_id: format!("SEL-{}", short_id()),
            provider_id: provider_id.to_string(),
            quantity,
            quote: Quote {
                price: Price {
                    currency: "GBP".to_string(),
                    value: format!("{:.2}", unit_price * quantity.amount),
                },
                ttl: "PT30M".to_string(),
            },
        })
    }

    async fn init(
        &self,
        _ctx: &BecknContext,
        provider_id: &str,
        window: FulfillmentWindow,
    ) -> StageOutcome<Order> {
        if let Err(reason) = self.enter(Stage::Init).await {
            return StageOutcome::Failed(reason);
        }
        if !self.catalog.iter().any(|r| r.id == provider_id) {
            return StageOutcome::NotFound;
        }
        let order = Order {
            id: format!("ORD-{}", short_id()),
            provider_id: provider_id.to_string(),
            state: OrderState::Draft,
            window,
        };
        self.orders.lock().insert(order.id.clone(), order.clone());
        StageOutcome::Found(order)
    }

    async fn confirm(
        &self,
        _ctx: &BecknContext,
        order_id: &str,
        provider_id: &str,
    ) -> StageOutcome<Order> {
        if let Err(reason) = self.enter(Stage::Confirm).await {
            return StageOutcome::Failed(reason);
        }
        if self
            .orders
            .lock()
            .get(order_id)
            .is_some_and(|o| o.provider_id != provider_id)
        {
            return StageOutcome::Failed(format!(
                "order {order_id} was not initialised with provider {provider_id}"
            ));
        }
        self.transition(order_id, &[OrderState::Draft], OrderState::Active)
    }

    async fn status(&self, _ctx: &BecknContext, order_id: &str) -> StageOutcome<Order> {
        if let Err(reason) = self.enter(Stage::Status).await {
            return StageOutcome::Failed(reason);
        }
        match self.orders.lock().get(order_id) {
            Some(order) => StageOutcome::Found(order.clone()),
            None => StageOutcome::NotFound,
        }
    }

    async fn cancel(&self, _ctx: &BecknContext, order_id: &str) -> StageOutcome<Order> {
        if let Err(reason) = self.enter(Stage::Cancel).await {
            return StageOutcome::Failed(reason);
        }
        self.transition(
            order_id,
            &[OrderState::Draft, OrderState::Active],
            OrderState::Cancelled,
        )
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_uppercase()
}

/// Six sandbox resources spread over the London substations.
pub fn sandbox_catalog() -> Vec<DerResource> {
    let der = |id: &str,
               name: &str,
               der_type: DerType,
               capacity: f32,
               current_output: f32,
               gps: &str,
               address: &str,
               price: f32| DerResource {
        id: id.to_string(),
        name: name.to_string(),
        der_type,
        capacity,
        current_output,
        location: Some(Location {
            gps: gps.to_string(),
            address: address.to_string(),
        }),
        price_per_unit: Some(price),
        availability: Some("available".to_string()),
    };

    vec![
        der(
            "DER-BATT-001",
            "Tesla Powerwall #42",
            DerType::Battery,
            13.5,
            8.2,
            "51.5074,-0.1278",
            "Westminster, London",
            45.0,
        ),
        der(
            "DER-EV-002",
            "Rapid EV Charger Station B",
            DerType::Ev,
            150.0,
            0.0,
            "51.5390,-0.1426",
            "Camden, London",
            50.0,
        ),
        der(
            "DER-SOLAR-003",
            "Commercial Solar Array",
            DerType::Solar,
            25.0,
            18.5,
            "51.5450,-0.0553",
            "Hackney, London",
            35.0,
        ),
        der(
            "DER-DR-004",
            "Smart HVAC Load Controller",
            DerType::DemandResponse,
            50.0,
            0.0,
            "51.5362,-0.1033",
            "Islington, London",
            40.0,
        ),
        der(
            "DER-BATT-005",
            "Community Battery Bank",
            DerType::Battery,
            200.0,
            120.0,
            "51.5099,-0.0059",
            "Tower Hamlets, London",
            42.0,
        ),
        der(
            "DER-DR-006",
            "Industrial Load Shift System",
            DerType::DemandResponse,
            300.0,
            0.0,
            "51.4952,-0.1145",
            "Lambeth, London",
            38.0,
        ),
    ]
}
