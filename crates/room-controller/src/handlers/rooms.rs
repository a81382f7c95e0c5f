//! Room REST handlers.
//!
//! Thin adapters over `RoomRegistry`:
//!
//! - `POST /api/rooms` - Create room
//! - `GET /api/rooms` - List active rooms (paged)
//! - `GET /api/rooms/{id}` - Room details plus live roster
//! - `POST /api/rooms/{id}/join` - Join a room
//! - `POST /api/rooms/{id}/leave` - Leave a room
//! - `POST /api/rooms/{id}/end` - End a room (owner only)
//!
//! # Identity
//!
//! Authentication is out of scope for this service; callers identify
//! themselves with the `X-User-Id` header and the upstream gateway is
//! trusted to have verified it. Requests without the header are rejected.

use crate::errors::RcError;
use crate::models::{
    validate_user_id, CreateRoomRequest, ListRoomsParams, RoomDetailResponse, RoomResponse,
};
use crate::routes::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Header carrying the caller's identity.
const USER_ID_HEADER: &str = "x-user-id";

/// Extract and validate the caller's user ID from request headers.
fn require_user_id(headers: &HeaderMap) -> Result<String, RcError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    validate_user_id(raw).map_err(|msg| RcError::BadRequest(msg.to_string()))?;
    Ok(raw.trim().to_string())
}

/// Handler for POST /api/rooms
///
/// Create a new room owned by the caller.
///
/// # Response
///
/// - 201 Created: Room created and persisted
/// - 400 Bad Request: Invalid body or missing identity header
/// - 503 Service Unavailable: Durable store rejected the write
#[instrument(skip_all, name = "rc.room.create", fields(method = "POST", endpoint = "/api/rooms"))]
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<(StatusCode, Json<RoomResponse>), RcError> {
    let owner_id = require_user_id(&headers)?;

    // Deserialize request body manually to return 400 (not Axum's default 422)
    let request: CreateRoomRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "rc.handlers.rooms", error = %e, "Invalid request body");
        RcError::BadRequest("Invalid request body".to_string())
    })?;

    request
        .validate()
        .map_err(|msg| RcError::BadRequest(msg.to_string()))?;

    let room = state
        .registry
        .create_room(request.into_spec(owner_id))
        .await?;

    info!(
        target: "rc.handlers.rooms",
        room_id = %room.id,
        owner_id = %room.owner_id,
        "Room created"
    );

    Ok((StatusCode::CREATED, Json(room.into())))
}

/// Handler for GET /api/rooms
///
/// List active rooms, newest first, paged by `limit` and `offset`.
#[instrument(skip_all, name = "rc.room.list")]
pub async fn list_rooms(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListRoomsParams>,
) -> Result<Json<Vec<RoomResponse>>, RcError> {
    let rooms = state
        .registry
        .list_active_rooms(params.limit(), params.offset())
        .await?;

    Ok(Json(rooms.into_iter().map(RoomResponse::from).collect()))
}

/// Handler for GET /api/rooms/{id}
///
/// Room details plus the live participant roster. An ended room is still
/// returned (clients resolve stale links), with an empty roster.
#[instrument(skip_all, name = "rc.room.get", fields(room_id = %room_id))]
pub async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
) -> Result<Json<RoomDetailResponse>, RcError> {
    let room = state.registry.get_room(room_id).await?;

    // The roster is defined by the active set; an ended or not-yet-cached
    // room simply has no live participants.
    let participants = match state.registry.room_participants(room_id).await {
        Ok(participants) => participants,
        Err(RcError::NotFound(_)) => Vec::new(),
        Err(err) => return Err(err),
    };

    Ok(Json(RoomDetailResponse {
        room: room.into(),
        participants,
    }))
}

/// Handler for POST /api/rooms/{id}/join
///
/// Join the caller to the room and return the updated roster.
///
/// # Response
///
/// - 200 OK: Joined
/// - 404 Not Found: No such room
/// - 409 Conflict: Caller already joined
/// - 410 Gone: Room has ended
/// - 403 Forbidden: Capability check denied a private-room join
#[instrument(skip_all, name = "rc.room.join", fields(room_id = %room_id))]
pub async fn join_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<Json<RoomDetailResponse>, RcError> {
    let user_id = require_user_id(&headers)?;

    state.registry.join_room(room_id, &user_id).await?;

    debug!(target: "rc.handlers.rooms", room_id = %room_id, user_id = %user_id, "Joined room");

    let room = state.registry.get_room(room_id).await?;
    let participants = state.registry.room_participants(room_id).await?;

    Ok(Json(RoomDetailResponse {
        room: room.into(),
        participants,
    }))
}

/// Handler for POST /api/rooms/{id}/leave
///
/// Remove the caller from the room. An empty room with `auto_delete` set
/// ends as a side effect.
#[instrument(skip_all, name = "rc.room.leave", fields(room_id = %room_id))]
pub async fn leave_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, RcError> {
    let user_id = require_user_id(&headers)?;

    state.registry.leave_room(room_id, &user_id).await?;

    debug!(target: "rc.handlers.rooms", room_id = %room_id, user_id = %user_id, "Left room");

    Ok(StatusCode::NO_CONTENT)
}

/// Handler for POST /api/rooms/{id}/end
///
/// End the room. Only the owner may end a room; ending an already-ended
/// room succeeds without a second durable write.
#[instrument(skip_all, name = "rc.room.end", fields(room_id = %room_id))]
pub async fn end_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<Uuid>,
    headers: HeaderMap,
) -> Result<StatusCode, RcError> {
    let user_id = require_user_id(&headers)?;

    let room = state.registry.get_room(room_id).await?;
    if room.owner_id != user_id {
        return Err(RcError::Forbidden(format!(
            "user {user_id} does not own room {room_id}"
        )));
    }

    state.registry.end_room(room_id).await?;

    // Clients still connected over WebSocket get a room-ended close rather
    // than a channel into a terminal room.
    if let Err(err) = state.hub.close_room(room_id).await {
        debug!(
            target: "rc.handlers.rooms",
            room_id = %room_id,
            error = %err,
            "room close fan-out skipped"
        );
    }

    info!(target: "rc.handlers.rooms", room_id = %room_id, user_id = %user_id, "Room ended");

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_require_user_id_present() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));

        let user_id = require_user_id(&headers).expect("header should be accepted");
        assert_eq!(user_id, "alice");
    }

    #[test]
    fn test_require_user_id_trims_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  alice  "));

        let user_id = require_user_id(&headers).expect("header should be accepted");
        assert_eq!(user_id, "alice");
    }

    #[test]
    fn test_require_user_id_missing() {
        let headers = HeaderMap::new();

        let err = require_user_id(&headers).expect_err("missing header should be rejected");
        assert!(matches!(err, RcError::BadRequest(_)));
    }

    #[test]
    fn test_require_user_id_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(""));

        let err = require_user_id(&headers).expect_err("empty header should be rejected");
        assert!(matches!(err, RcError::BadRequest(_)));
    }

    #[test]
    fn test_require_user_id_too_long() {
        let mut headers = HeaderMap::new();
        let long = "u".repeat(200);
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&long).unwrap());

        let err = require_user_id(&headers).expect_err("oversized header should be rejected");
        assert!(matches!(err, RcError::BadRequest(_)));
    }

    // Full handler flows (status codes, bodies, registry effects) are
    // exercised in tests/rest_api.rs against the in-memory store.
}
