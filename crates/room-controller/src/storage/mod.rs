//! Durable store seam.
//!
//! The registry is the authority for what is live; the store is the
//! authority for what happened. Everything behind this trait is replaceable:
//! production uses Postgres (`PgRoomStore`), tests use the in-memory store
//! from `rc-test-utils`.

mod postgres;

pub use postgres::PgRoomStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::registry::{Participant, Room};

/// Durable-store failures. `Duplicate` is the insert-if-absent conflict;
/// everything else is surfaced to callers as retryable storage trouble.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// CRUD operations the coordination core needs from durable storage.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Insert a new room. Fails with `Duplicate` if the ID is taken.
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError>;

    /// Point lookup by room ID.
    async fn fetch_room(&self, id: Uuid) -> Result<Option<Room>, StoreError>;

    /// Non-ended rooms ordered by creation time descending.
    async fn list_active_rooms(&self, limit: i64, offset: i64) -> Result<Vec<Room>, StoreError>;

    /// Set the room's end timestamp and close any open participant rows.
    /// A second call for the same room is a no-op.
    async fn mark_room_ended(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Record a user joining a room. Fails with `Duplicate` if an open
    /// membership row already exists for the pair.
    async fn insert_participant(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Close the open membership row for the pair.
    async fn mark_participant_left(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Open membership rows for a room.
    async fn active_participants(&self, room_id: Uuid) -> Result<Vec<Participant>, StoreError>;

    /// Append a chat message to the room's history.
    async fn record_chat_message(
        &self,
        room_id: Uuid,
        user_id: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cheap connectivity probe for the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
