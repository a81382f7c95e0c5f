//! WebSocket upgrade handler.
//!
//! `GET /api/ws/rooms/{id}?user_id=...` upgrades into a hub-registered
//! connection. Identity travels in the query string because the browser
//! WebSocket API cannot set request headers.
//!
//! Validation that can answer over HTTP happens before the upgrade (bad
//! identity, unknown room, ended room, capability denial, shutdown window).
//! Everything after the upgrade - membership, registration, the pumps - is
//! owned by `hub::run_connection`, which reports failures through WebSocket
//! close codes instead.

use crate::errors::RcError;
use crate::hub::{run_connection, LivenessSettings, SessionDeps};
use crate::models::validate_user_id;
use crate::policy::RoomAction;
use crate::routes::AppState;
use crate::transport::WsTransport;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query, State},
    response::Response,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

/// Query parameters for the WebSocket route.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: String,
}

/// Handler for GET /api/ws/rooms/{id}
///
/// # Response
///
/// - 101 Switching Protocols: connection accepted and handed to the hub
/// - 400 Bad Request: missing or invalid `user_id`
/// - 404 Not Found: no such room
/// - 410 Gone: room has ended
/// - 403 Forbidden: capability check denied signaling in a private room
/// - 503 Service Unavailable: shutdown in progress
#[instrument(skip_all, name = "rc.ws.connect", fields(room_id = %room_id))]
pub async fn ws_connect(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, RcError> {
    validate_user_id(&params.user_id)
        .map_err(|msg| RcError::BadRequest(msg.to_string()))?;
    let user_id = params.user_id.trim().to_string();

    if state.hub.is_cancelled() {
        return Err(RcError::Draining);
    }

    let room = state.registry.get_room(room_id).await?;
    if room.has_ended() {
        return Err(RcError::RoomEnded(room_id.to_string()));
    }

    // Private rooms gate signaling on the capability check up front;
    // join authorization happens inside the registry on register.
    if room.is_private {
        state
            .policy
            .authorize(&user_id, room_id, RoomAction::Signal)
            .await?;
    }

    let deps = SessionDeps {
        hub: state.hub.clone(),
        registry: Arc::clone(&state.registry),
        relay: Arc::clone(&state.relay),
        store: Arc::clone(&state.store),
        liveness: LivenessSettings::from_config(&state.config),
    };
    let max_message_bytes = state.config.max_message_bytes;

    Ok(ws
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| {
            let transport = Box::new(WsTransport::new(socket, max_message_bytes));
            run_connection(deps, transport, room_id, user_id)
        }))
}

// The pre-upgrade checks need a genuinely upgradable connection to answer
// over HTTP, so they are exercised per collaborator (registry, policy, hub)
// in unit tests; accepted-connection behavior and the close-code rejections
// run over the in-memory transport in tests/hub_fanout.rs.
