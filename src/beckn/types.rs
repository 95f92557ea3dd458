use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol domain for energy-grid flexibility.
pub const DOMAIN: &str = "energy:deg";
/// Protocol version stamped on every context.
pub const PROTOCOL_VERSION: &str = "1.1.0";

/// One protocol step of a fulfillment journey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Search,
    Select,
    Init,
    Confirm,
    Status,
    Cancel,
}

impl Stage {
    /// The happy path in protocol order. `Cancel` is never part of it.
    pub const HAPPY_PATH: [Stage; 5] = [
        Stage::Search,
        Stage::Select,
        Stage::Init,
        Stage::Confirm,
        Stage::Status,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Select => "select",
            Self::Init => "init",
            Self::Confirm => "confirm",
            Self::Status => "status",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of this application on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BapIdentity {
    pub bap_id: String,
    pub bap_uri: String,
}

impl Default for BapIdentity {
    fn default() -> Self {
        Self {
            bap_id: "grid-command-center".to_string(),
            bap_uri: "http://localhost:5000".to_string(),
        }
    }
}

/// Envelope header sent with every stage message.
#[derive(Debug, Clone, Serialize)]
pub struct BecknContext {
    pub domain: &'static str,
    pub action: Stage,
    /// Stable for every message of one journey.
    pub transaction_id: String,
    /// Fresh for every message.
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub bap_id: String,
    pub bap_uri: String,
}

impl BecknContext {
    pub fn new(action: Stage, transaction_id: &str, bap: &BapIdentity) -> Self {
        Self {
            domain: DOMAIN,
            action,
            transaction_id: transaction_id.to_string(),
            message_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            version: PROTOCOL_VERSION,
            bap_id: bap.bap_id.clone(),
            bap_uri: bap.bap_uri.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FulfillmentType {
    #[default]
    EnergyDispatch,
    EnergyStorage,
    EnergyDemandReduction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "kWh")]
    Kwh,
    #[default]
    #[serde(rename = "kW")]
    Kw,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quantity {
    pub amount: f32,
    #[serde(default)]
    pub unit: Unit,
}

impl Quantity {
    pub fn kw(amount: f32) -> Self {
        Self {
            amount,
            unit: Unit::Kw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerType {
    Battery,
    Ev,
    Solar,
    DemandResponse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub gps: String,
    pub address: String,
}

/// A dispatchable resource offered by a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerResource {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub der_type: DerType,
    /// Maximum output (kW).
    pub capacity: f32,
    pub current_output: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(rename = "price_per_unit", skip_serializing_if = "Option::is_none")]
    pub price_per_unit: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub availability: Option<String>,
}

impl DerResource {
    pub fn is_available(&self) -> bool {
        self.availability.as_deref().is_none_or(|a| a == "available")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Price {
    pub currency: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub price: Price,
    /// ISO-8601 duration the quote stays valid for.
    pub ttl: String,
}

/// Result of the select stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionAck {
    pub selection_id: String,
    pub provider_id: String,
    pub quantity: Quantity,
    pub quote: Quote,
}

/// How the select stage picks a provider from the search result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Selection {
    /// First available result.
    #[default]
    First,
    /// A specific resource id.
    Resource(String),
}

impl Selection {
    /// Picks a resource from the catalog.
    pub fn pick<'a>(&self, catalog: &'a [DerResource]) -> Option<&'a DerResource> {
        match self {
            Self::First => catalog.first(),
            Self::Resource(id) => catalog.iter().find(|r| &r.id == id),
        }
    }
}

/// Delivery window requested at init.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl FulfillmentWindow {
    pub fn starting_now(minutes: i64) -> Self {
        let start_time = Utc::now();
        Self {
            start_time,
            end_time: start_time + Duration::minutes(minutes),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    Draft,
    Active,
    Cancelled,
    Completed,
    Failed,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "DRAFT",
            Self::Active => "ACTIVE",
            Self::Cancelled => "CANCELLED",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub provider_id: String,
    pub state: OrderState,
    pub window: FulfillmentWindow,
}

/// Result of one gateway call.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome<T> {
    Found(T),
    /// Nothing matched: empty catalog, unknown provider or order.
    NotFound,
    /// The counterparty reported an error.
    Failed(String),
}

impl<T> StageOutcome<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(v) => Some(v),
            _ => None,
        }
    }
}
