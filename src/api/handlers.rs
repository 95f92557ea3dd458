//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};

use super::AppState;
use super::types::{
    ActivateRequest, ActivationData, ApiError, ApiResponse, DismissData, PlanData,
    SearchRequest, SelectRequest,
};
use crate::agent::{self, GridProblem, OrchestrationResult};
use crate::audit::AuditEntry;
use crate::beckn::journey::JourneyRequest;
use crate::beckn::types::{DerResource, Order, Selection, SelectionAck};
use crate::grid::registry::ActiveDer;
use crate::grid::state::FeederSnapshot;
use crate::service::{Activation, ActivationRequest, PendingRequest};

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Request body whose rejection is rendered in the error envelope.
type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// `POST /api/der/search` → available DER resources.
pub async fn search(
    State(state): State<Arc<AppState>>,
    body: JsonBody<SearchRequest>,
) -> ApiResult<Vec<DerResource>> {
    let Json(body) = body?;
    let service = &state.service;
    let fulfillment = body
        .fulfillment_type
        .unwrap_or(service.settings().fulfillment);
    let quantity = body.quantity.as_ref().map(|q| q.parse()).transpose()?;

    let found = service.search(fulfillment, quantity).await?;
    let message = format!("Found {} available DER resources", found.len());
    Ok(Json(ApiResponse::ok(found).with_message(message)))
}

/// `POST /api/der/{id}/select` → quote for one resource.
pub async fn select(
    State(state): State<Arc<AppState>>,
    Path(der_id): Path<String>,
    body: JsonBody<SelectRequest>,
) -> ApiResult<SelectionAck> {
    let Json(body) = body?;
    let quantity = body.quantity.parse()?;
    let ack = state.service.select(&der_id, quantity).await?;
    Ok(Json(
        ApiResponse::ok(ack).with_message(format!("DER {der_id} selected")),
    ))
}

/// `POST /api/der/{id}/activate` → full journey, attributed to `feederId`
/// when one is given.
pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path(der_id): Path<String>,
    body: JsonBody<ActivateRequest>,
) -> ApiResult<ActivationData> {
    let Json(body) = body?;
    let quantity = body.quantity.parse()?;
    let window = body.window()?;
    let service = &state.service;

    let data = match body.feeder_id {
        Some(feeder_id) => {
            let request = ActivationRequest {
                feeder_id,
                quantity,
                window,
            };
            ActivationData::from(service.activate_der(&der_id, request).await?)
        }
        None => {
            let request = JourneyRequest {
                fulfillment: service.settings().fulfillment,
                quantity,
                selection: Selection::Resource(der_id.clone()),
                window,
            };
            let outcome = service.run_journey(&request).await?;
            ActivationData {
                order_id: outcome.order.id,
                der_id: outcome.provider.id,
                status: outcome.order.state,
                output: quantity.amount,
                feeder_id: None,
                transaction_id: outcome.transaction_id,
                quote: outcome.selection.quote,
            }
        }
    };
    Ok(Json(
        ApiResponse::ok(data).with_message(format!("DER {der_id} activated")),
    ))
}

/// `POST /api/der/{orderId}/deactivate` → releases the activation record.
///
/// Unknown orders succeed with no data.
pub async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Json<ApiResponse<ActiveDer>> {
    match state.service.deactivate(&order_id) {
        Some(released) => Json(
            ApiResponse::ok(released).with_message(format!("Order {order_id} deactivated")),
        ),
        None => Json(ApiResponse {
            success: true,
            data: None,
            message: Some(format!("Order {order_id} was not active")),
            error: None,
        }),
    }
}

/// `POST /api/der/{orderId}/cancel` → gateway cancel plus release.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    let order = state.service.cancel_order(&order_id).await?;
    Ok(Json(
        ApiResponse::ok(order).with_message(format!("Order {order_id} cancelled")),
    ))
}

/// `GET /api/der/status/{orderId}` → tracked order state.
pub async fn status(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> ApiResult<Order> {
    let order = state.service.order_status(&order_id).await?;
    Ok(Json(ApiResponse::ok(order)))
}

/// `GET /api/feeders`
pub async fn feeders(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<FeederSnapshot>>> {
    Json(ApiResponse::ok(state.service.feeders()))
}

/// `GET /api/auto-activation-requests`
pub async fn pending_requests(
    State(state): State<Arc<AppState>>,
) -> Json<ApiResponse<Vec<PendingRequest>>> {
    Json(ApiResponse::ok(state.service.pending_requests()))
}

/// `POST /api/auto-activation/{feederId}/confirm`
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    Path(feeder_id): Path<String>,
) -> ApiResult<Vec<Activation>> {
    let activations = state.service.confirm_auto_activation(&feeder_id).await?;
    let message = format!("{} DER(s) activated for {feeder_id}", activations.len());
    Ok(Json(ApiResponse::ok(activations).with_message(message)))
}

/// `POST /api/auto-activation/{feederId}/dismiss`
pub async fn dismiss(
    State(state): State<Arc<AppState>>,
    Path(feeder_id): Path<String>,
) -> ApiResult<DismissData> {
    let dismissed = state.service.dismiss_auto_activation(&feeder_id)?;
    Ok(Json(ApiResponse::ok(DismissData {
        feeder_id,
        dismissed,
    })))
}

/// `GET /api/audit-logs` → newest first.
pub async fn audit_logs(State(state): State<Arc<AppState>>) -> Json<ApiResponse<Vec<AuditEntry>>> {
    Json(ApiResponse::ok(state.service.audit_logs()))
}

/// `POST /api/agent/plan` → decision sequence without executing it.
pub async fn plan(body: JsonBody<GridProblem>) -> ApiResult<PlanData> {
    let Json(problem) = body?;
    let decisions = agent::plan(problem.urgency, problem.feeder_id.as_deref());
    Ok(Json(ApiResponse::ok(PlanData { problem, decisions })))
}

/// `POST /api/agent/orchestrate` → plans and executes.
///
/// Execution failures are reported in the envelope, not as HTTP errors.
pub async fn orchestrate(
    State(state): State<Arc<AppState>>,
    body: JsonBody<GridProblem>,
) -> ApiResult<OrchestrationResult> {
    let Json(problem) = body?;
    let result = agent::orchestrate(&state.service, problem).await;
    let success = result.success;
    let message = result.message.clone();
    Ok(Json(ApiResponse {
        success,
        error: (!success).then(|| message.clone()),
        message: Some(message),
        data: Some(result),
    }))
}
