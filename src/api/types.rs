//! Request bodies, response envelope and error mapping for the HTTP API.
//!
//! Field names are camelCase on the wire.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::agent::{AgentDecision, GridProblem};
use crate::beckn::types::{FulfillmentType, FulfillmentWindow, OrderState, Quantity, Quote, Unit};
use crate::error::{GridError, JourneyError};
use crate::service::Activation;

/// Envelope wrapping every response body.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            error: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// DER amount as sent by clients: a number or a numeric string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f32),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuantityBody {
    pub amount: Amount,
    #[serde(default)]
    pub unit: Unit,
}

impl QuantityBody {
    /// Parses the amount into a protocol quantity.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` for a non-numeric, negative or
    /// non-finite amount.
    pub fn parse(&self) -> Result<Quantity, ApiError> {
        let amount = match &self.amount {
            Amount::Number(n) => *n,
            Amount::Text(s) => s.trim().parse::<f32>().map_err(|_| {
                ApiError::BadRequest(format!("quantity.amount \"{s}\" is not a number"))
            })?,
        };
        if !amount.is_finite() || amount < 0.0 {
            return Err(ApiError::BadRequest(format!(
                "quantity.amount must be a non-negative number, got {amount}"
            )));
        }
        Ok(Quantity {
            amount,
            unit: self.unit,
        })
    }
}

/// `POST /api/der/search`
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchRequest {
    pub fulfillment_type: Option<FulfillmentType>,
    pub quantity: Option<QuantityBody>,
}

/// `POST /api/der/{id}/select`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectRequest {
    pub quantity: QuantityBody,
}

/// `POST /api/der/{id}/activate`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivateRequest {
    pub quantity: QuantityBody,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    /// Feeder the DER is attributed to. Without one the order is confirmed
    /// but no feeder load changes.
    #[serde(default)]
    pub feeder_id: Option<String>,
}

impl ActivateRequest {
    /// Delivery window, if both ends were given.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::BadRequest` if only one end is given or the window
    /// ends before it starts.
    pub fn window(&self) -> Result<Option<FulfillmentWindow>, ApiError> {
        match (self.start_time, self.end_time) {
            (None, None) => Ok(None),
            (Some(start_time), Some(end_time)) if end_time > start_time => {
                Ok(Some(FulfillmentWindow {
                    start_time,
                    end_time,
                }))
            }
            (Some(_), Some(_)) => Err(ApiError::BadRequest(
                "endTime must be after startTime".to_string(),
            )),
            _ => Err(ApiError::BadRequest(
                "startTime and endTime must be given together".to_string(),
            )),
        }
    }
}

/// Result of an explicit activation.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationData {
    pub order_id: String,
    pub der_id: String,
    pub status: OrderState,
    pub output: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feeder_id: Option<String>,
    pub transaction_id: String,
    pub quote: Quote,
}

impl From<Activation> for ActivationData {
    fn from(a: Activation) -> Self {
        Self {
            order_id: a.order_id,
            der_id: a.der_id,
            status: a.status,
            output: a.output,
            feeder_id: Some(a.feeder_id),
            transaction_id: a.transaction_id,
            quote: a.quote,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DismissData {
    pub feeder_id: String,
    pub dismissed: bool,
}

#[derive(Debug, Serialize)]
pub struct PlanData {
    pub problem: GridProblem,
    pub decisions: Vec<AgentDecision>,
}

/// Failure of an API call, rendered as `{success: false, error}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    /// Body that is not JSON or does not match the request shape.
    #[error("invalid request body: {}", .0.body_text())]
    Body(#[from] JsonRejection),
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) | Self::Body(_) => StatusCode::BAD_REQUEST,
            Self::Grid(err) => match err {
                GridError::FeederNotFound(_)
                | GridError::OrderNotFound(_)
                | GridError::Journey(
                    JourneyError::OrderNotFound(_) | JourneyError::ProviderNotFound(_),
                ) => StatusCode::NOT_FOUND,
                GridError::DuplicateOrder(_) | GridError::NotPending(_) => StatusCode::CONFLICT,
                GridError::InvalidFeeder { .. } | GridError::InvalidOutput(_) => {
                    StatusCode::BAD_REQUEST
                }
                GridError::Journey(_) => StatusCode::BAD_GATEWAY,
                GridError::Evaluation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            message: None,
            error: Some(self.to_string()),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beckn::types::Stage;

    #[test]
    fn amount_accepts_number_or_string() {
        let q: QuantityBody = serde_json::from_str(r#"{"amount": "25.5", "unit": "kW"}"#)
            .expect("string amount");
        assert_eq!(q.parse().expect("parse").amount, 25.5);

        let q: QuantityBody = serde_json::from_str(r#"{"amount": 10}"#).expect("number amount");
        assert_eq!(q.parse().expect("parse").unit, Unit::Kw);

        let q: QuantityBody = serde_json::from_str(r#"{"amount": "lots"}"#).expect("shape");
        assert!(matches!(q.parse(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn negative_amount_rejected() {
        let q: QuantityBody = serde_json::from_str(r#"{"amount": -1}"#).expect("shape");
        assert!(q.parse().is_err());
    }

    #[test]
    fn window_requires_both_ends_in_order() {
        let req: ActivateRequest = serde_json::from_str(
            r#"{"quantity": {"amount": 5},
                "startTime": "2026-01-01T10:00:00Z",
                "endTime": "2026-01-01T09:00:00Z"}"#,
        )
        .expect("shape");
        assert!(req.window().is_err());

        let req: ActivateRequest =
            serde_json::from_str(r#"{"quantity": {"amount": 5}, "startTime": "2026-01-01T10:00:00Z"}"#)
                .expect("shape");
        assert!(req.window().is_err());

        let req: ActivateRequest =
            serde_json::from_str(r#"{"quantity": {"amount": 5}}"#).expect("shape");
        assert!(req.window().expect("window").is_none());
    }

    #[test]
    fn error_status_mapping() {
        let cases = [
            (GridError::FeederNotFound("F".into()), StatusCode::NOT_FOUND),
            (GridError::NotPending("F".into()), StatusCode::CONFLICT),
            (GridError::DuplicateOrder("O".into()), StatusCode::CONFLICT),
            (GridError::InvalidOutput(-1.0), StatusCode::BAD_REQUEST),
            (
                GridError::Journey(JourneyError::StageFailed {
                    stage: Stage::Confirm,
                    reason: "x".into(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                GridError::Journey(JourneyError::OrderNotFound("O".into())),
                StatusCode::NOT_FOUND,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }
}
