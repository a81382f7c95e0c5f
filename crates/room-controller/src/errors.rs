//! Room Controller error types.
//!
//! One error enum covers the whole subsystem. REST handlers surface it via
//! the `IntoResponse` impl; the WebSocket accept path maps it to a close
//! code instead. Messages returned to clients are intentionally generic:
//! the real cause is logged server-side and never leaked over the wire.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::storage::StoreError;

/// Room Controller error type.
#[derive(Debug, Error)]
pub enum RcError {
    /// Room, participant, or signaling session absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate create (room ID collision in the durable store).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Join attempted by a user already present in the room.
    #[error("already joined: {0}")]
    AlreadyJoined(String),

    /// A non-closed signaling session already exists for this user.
    #[error("already negotiating: {0}")]
    AlreadyNegotiating(String),

    /// Operation attempted on a room that has ended.
    #[error("room ended: {0}")]
    RoomEnded(String),

    /// Durable-store call failed; the caller may retry.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unparseable inbound payload (envelope, offer, or candidate).
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Offer handling failed past the validation stage.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Liveness or operation deadline exceeded.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Capability check denied the action.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Caller-supplied parameters were invalid.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The subsystem is shutting down and not accepting new work.
    #[error("draining, not accepting new connections")]
    Draining,

    /// Invariant violation or unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RcError {
    /// HTTP status for this error (also used for metrics labels).
    pub fn status_code(&self) -> StatusCode {
        match self {
            RcError::NotFound(_) => StatusCode::NOT_FOUND,
            RcError::AlreadyExists(_)
            | RcError::AlreadyJoined(_)
            | RcError::AlreadyNegotiating(_) => StatusCode::CONFLICT,
            RcError::RoomEnded(_) => StatusCode::GONE,
            RcError::Storage(_) | RcError::Draining => StatusCode::SERVICE_UNAVAILABLE,
            RcError::MalformedInput(_) | RcError::Negotiation(_) | RcError::BadRequest(_) => {
                StatusCode::BAD_REQUEST
            }
            RcError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RcError::Forbidden(_) => StatusCode::FORBIDDEN,
            RcError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            RcError::NotFound(_) => "not_found",
            RcError::AlreadyExists(_) => "already_exists",
            RcError::AlreadyJoined(_) => "already_joined",
            RcError::AlreadyNegotiating(_) => "already_negotiating",
            RcError::RoomEnded(_) => "room_ended",
            RcError::Storage(_) => "storage_unavailable",
            RcError::MalformedInput(_) => "malformed_input",
            RcError::Negotiation(_) => "negotiation_failed",
            RcError::Timeout(_) => "timeout",
            RcError::Forbidden(_) => "forbidden",
            RcError::BadRequest(_) => "bad_request",
            RcError::Draining => "draining",
            RcError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to hand to clients. Storage and internal failures are
    /// reduced to a generic sentence; their detail stays in the server log.
    pub fn client_message(&self) -> String {
        match self {
            RcError::Storage(_) => "storage temporarily unavailable".to_string(),
            RcError::Internal(_) => "internal error".to_string(),
            RcError::Timeout(_) => "operation timed out".to_string(),
            other => other.to_string(),
        }
    }

    /// WebSocket close code used when `ConnectionHub::accept` rejects a
    /// transport. 4xxx codes mirror the HTTP mapping; draining uses the
    /// standard 1013 (try again later), everything else 1008 (policy).
    pub fn close_code(&self) -> u16 {
        match self {
            RcError::NotFound(_) => 4404,
            RcError::RoomEnded(_) => 4410,
            RcError::Forbidden(_) => 4403,
            RcError::AlreadyJoined(_) => 4409,
            RcError::Draining => 1013,
            RcError::Storage(_) | RcError::Internal(_) => 1011,
            _ => 1008,
        }
    }
}

impl From<StoreError> for RcError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Duplicate(what) => RcError::AlreadyExists(what),
            other => RcError::Storage(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for RcError {
    fn into_response(self) -> Response {
        match &self {
            RcError::Storage(detail) | RcError::Internal(detail) => {
                tracing::error!(target: "rc.errors", error = %detail, code = self.error_code(), "request failed");
            }
            other => {
                tracing::debug!(target: "rc.errors", error = %other, "request rejected");
            }
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.client_message(),
            },
        };

        (self.status_code(), Json(body)).into_response()
    }
}
