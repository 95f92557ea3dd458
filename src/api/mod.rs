//! REST API over the live grid service.
//!
//! Every response uses the `{success, data, message?, error?}` envelope.
//! Failures map to 404 (unknown feeder or order), 409 (duplicate order, no
//! pending request), 400 (invalid input) or 502 (journey failure).

mod handlers;
pub mod types;

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tracing::info;

use crate::service::GridService;

/// Application state shared across all request handlers.
///
/// Handlers only reach the grid through the service, which owns its lock.
pub struct AppState {
    pub service: Arc<GridService>,
}

impl AppState {
    pub fn new(service: Arc<GridService>) -> Arc<Self> {
        Arc::new(Self { service })
    }
}

/// Builds the axum router with all API routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/der/search", post(handlers::search))
        .route("/api/der/status/{order_id}", get(handlers::status))
        .route("/api/der/{id}/select", post(handlers::select))
        .route("/api/der/{id}/activate", post(handlers::activate))
        .route("/api/der/{id}/deactivate", post(handlers::deactivate))
        .route("/api/der/{id}/cancel", post(handlers::cancel))
        .route("/api/feeders", get(handlers::feeders))
        .route(
            "/api/auto-activation-requests",
            get(handlers::pending_requests),
        )
        .route(
            "/api/auto-activation/{feeder_id}/confirm",
            post(handlers::confirm),
        )
        .route(
            "/api/auto-activation/{feeder_id}/dismiss",
            post(handlers::dismiss),
        )
        .route("/api/audit-logs", get(handlers::audit_logs))
        .route("/api/agent/plan", post(handlers::plan))
        .route("/api/agent/orchestrate", post(handlers::orchestrate))
        .with_state(state)
}

/// Binds to `addr` and serves the API until `shutdown` resolves.
///
/// # Errors
///
/// Returns an `io::Error` if the listener cannot bind or the server fails.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
