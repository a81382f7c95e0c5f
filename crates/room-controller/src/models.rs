//! Room Controller API models.
//!
//! Request and response types for the REST surface. Domain types live in
//! `registry`; these wrap them so the wire contract can evolve without
//! touching registry internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::registry::{Participant, Room, RoomSpec};

/// Maximum room title length in bytes (after trimming).
pub const MAX_ROOM_TITLE_LENGTH: usize = 120;

/// Minimum room title length in bytes (after trimming).
pub const MIN_ROOM_TITLE_LENGTH: usize = 1;

/// Maximum room description length in bytes.
pub const MAX_ROOM_DESCRIPTION_LENGTH: usize = 500;

/// Maximum language tag length in bytes.
pub const MAX_LANGUAGE_TAG_LENGTH: usize = 16;

/// Maximum user ID length in bytes.
pub const MAX_USER_ID_LENGTH: usize = 128;

/// Default page size for room listings.
pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Upper bound on the page size for room listings.
pub const MAX_LIST_LIMIT: i64 = 200;

/// Validate a caller-supplied user ID (header or query string).
///
/// # Errors
///
/// Returns a static message when the ID is empty or over length.
pub fn validate_user_id(user_id: &str) -> Result<(), &'static str> {
    if user_id.trim().is_empty() {
        return Err("User ID is required");
    }
    if user_id.len() > MAX_USER_ID_LENGTH {
        return Err("User ID must be at most 128 bytes");
    }
    Ok(())
}

/// Request to create a new room.
///
/// All settings fields are optional; defaults are applied server-side.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateRoomRequest {
    /// Room title (required, 1-120 bytes after trimming).
    pub title: String,

    /// Free-form room description (optional, at most 500 bytes).
    pub description: Option<String>,

    /// Language tag for the room (optional, default "en").
    pub language: Option<String>,

    /// Whether joining requires a capability check (default: false).
    pub is_private: Option<bool>,

    /// Whether the expiry sweep may end this room (default: false).
    pub is_temporary: Option<bool>,

    /// Whether the room ends the moment it empties (default: false).
    pub auto_delete: Option<bool>,
}

impl CreateRoomRequest {
    /// Validate the request fields.
    ///
    /// # Errors
    ///
    /// Returns a static message naming the first failed check.
    pub fn validate(&self) -> Result<(), &'static str> {
        let title = self.title.trim();

        if title.len() < MIN_ROOM_TITLE_LENGTH {
            return Err("Title is required");
        }

        if title.len() > MAX_ROOM_TITLE_LENGTH {
            return Err("Title must be at most 120 characters");
        }

        if let Some(description) = &self.description {
            if description.len() > MAX_ROOM_DESCRIPTION_LENGTH {
                return Err("Description must be at most 500 characters");
            }
        }

        if let Some(language) = &self.language {
            if language.is_empty() || language.len() > MAX_LANGUAGE_TAG_LENGTH {
                return Err("Language tag must be 1-16 characters");
            }
        }

        Ok(())
    }

    /// Convert into the registry's creation spec, applying defaults.
    #[must_use]
    pub fn into_spec(self, owner_id: String) -> RoomSpec {
        RoomSpec {
            title: self.title.trim().to_string(),
            description: self.description.unwrap_or_default(),
            owner_id,
            language: self.language.unwrap_or_else(|| "en".to_string()),
            is_private: self.is_private.unwrap_or(false),
            is_temporary: self.is_temporary.unwrap_or(false),
            auto_delete: self.auto_delete.unwrap_or(false),
        }
    }
}

/// Query parameters for `GET /api/rooms`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListRoomsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListRoomsParams {
    /// Effective page size: default applied, clamped to the upper bound.
    #[must_use]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }

    /// Effective offset, never negative.
    #[must_use]
    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }
}

/// Room representation returned by the REST API.
#[derive(Debug, Clone, Serialize)]
pub struct RoomResponse {
    /// Unique room identifier.
    pub id: Uuid,

    /// Room title.
    pub title: String,

    /// Free-form room description.
    pub description: String,

    /// User who created the room.
    pub owner_id: String,

    /// Language tag for the room.
    pub language: String,

    /// Whether joining requires a capability check.
    pub is_private: bool,

    /// Whether the expiry sweep may end this room.
    pub is_temporary: bool,

    /// Whether the room ends the moment it empties.
    pub auto_delete: bool,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Terminal timestamp; present only on ended rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<Room> for RoomResponse {
    fn from(room: Room) -> Self {
        Self {
            id: room.id,
            title: room.title,
            description: room.description,
            owner_id: room.owner_id,
            language: room.language,
            is_private: room.is_private,
            is_temporary: room.is_temporary,
            auto_delete: room.auto_delete,
            created_at: room.created_at,
            ended_at: room.ended_at,
        }
    }
}

/// Room plus its live participant roster.
///
/// Returned by `GET /api/rooms/{id}` and `POST /api/rooms/{id}/join`; the
/// roster reflects this process's live view, not historical membership.
#[derive(Debug, Clone, Serialize)]
pub struct RoomDetailResponse {
    pub room: RoomResponse,
    pub participants: Vec<Participant>,
}

/// Body of the `/ready` probe.
///
/// `status` is always present; the other fields appear only when they
/// carry information, so the happy-path body stays small.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    /// "ready" or "not_ready".
    pub status: &'static str,

    /// Outcome of the storage ping, when one was attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<&'static str>,

    /// Short reason for the failure; never carries connection details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
