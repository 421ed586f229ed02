//! HTTP surface: WebSocket upgrade, health and metrics.

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::hub::{HubHandle, SessionId};
use crate::metrics::WS_UPGRADE_FAILURES_TOTAL;
use crate::session::{self, SessionConfig};

/// Shared state accessible from axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Hub new sessions register with.
    pub hub: HubHandle,
    /// Timing and sizing for new sessions.
    pub session: SessionConfig,
    /// Largest inbound frame/message accepted from a client.
    pub max_inbound_bytes: usize,
    /// Renders `/metrics` when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// GET /ws
async fn ws_handler(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let ws = match upgrade {
        Ok(ws) => ws,
        Err(rejection) => {
            warn!(reason = %rejection.body_text(), "websocket upgrade failed");
            counter!(WS_UPGRADE_FAILURES_TOTAL).increment(1);
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };

    let limit = state.max_inbound_bytes;
    ws.max_message_size(limit)
        .max_frame_size(limit)
        .on_failed_upgrade(|e| {
            warn!(error = %e, "websocket handshake failed after response");
            counter!(WS_UPGRADE_FAILURES_TOTAL).increment(1);
        })
        .on_upgrade(move |socket| {
            let id = SessionId::next();
            debug!(session_id = %id, "websocket upgraded");
            session::serve(socket, state.hub, state.session, id)
        })
}

/// GET /health
async fn health_handler() -> &'static str {
    "ok"
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
