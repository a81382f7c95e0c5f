//! Router assembly and shared application state.

use crate::config::Config;
use crate::handlers;
use crate::hub::HubHandle;
use crate::middleware::http_metrics_middleware;
use crate::observability::HealthState;
use crate::policy::AccessPolicy;
use crate::registry::RoomRegistry;
use crate::signaling::SignalingRelay;
use crate::storage::RoomStore;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// REST requests that outlive this are cut off with a 408.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Authoritative room and participant registry.
    pub registry: Arc<RoomRegistry>,

    /// Handle to the connection hub task.
    pub hub: HubHandle,

    /// Per-user signaling state machine.
    pub relay: Arc<SignalingRelay>,

    /// Durable store, shared with the registry.
    pub store: Arc<dyn RoomStore>,

    /// Capability check, shared with the registry.
    pub policy: Arc<dyn AccessPolicy>,

    /// Probe state for /health and /ready.
    pub health: Arc<HealthState>,
}

/// Assemble the full router.
///
/// Four sub-routers with different needs, merged at the end:
/// probes (`/health`, `/ready`), the Prometheus export (`/metrics`, which
/// carries the recorder handle as its own state), the REST room API under a
/// request timeout, and the WebSocket upgrade outside it. `TraceLayer` and
/// the metrics middleware wrap the merged whole, metrics outermost so it
/// counts responses the framework produces before any handler runs.
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let ops_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .with_state(state.clone());

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    let api_routes = Router::new()
        .route(
            "/api/rooms",
            post(handlers::create_room).get(handlers::list_rooms),
        )
        .route("/api/rooms/:id", get(handlers::get_room))
        .route("/api/rooms/:id/join", post(handlers::join_room))
        .route("/api/rooms/:id/leave", post(handlers::leave_room))
        .route("/api/rooms/:id/end", post(handlers::end_room))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state.clone());

    // The WebSocket route stays outside the timeout layer; the exchange it
    // bounds ends at the 101 and the connection itself is paced by the
    // hub's own liveness deadlines.
    let ws_routes = Router::new()
        .route("/api/ws/rooms/:id", get(handlers::ws_connect))
        .with_state(state);

    ops_routes
        .merge(metrics_routes)
        .merge(api_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(http_metrics_middleware))
}
