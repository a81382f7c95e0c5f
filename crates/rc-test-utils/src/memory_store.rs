//! In-memory `RoomStore` for registry and handler testing.
//!
//! Mirrors the semantics of the Postgres store: one open membership row per
//! (room, user) pair, idempotent end updates, active listing ordered by
//! creation time descending. On top of that it counts calls per operation
//! and can be told to fail the next call of a given operation, which is how
//! rollback paths are exercised.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::{MemoryRoomStore, StoreOp};
//!
//! let store = MemoryRoomStore::new();
//! store.inject_failure(StoreOp::InsertParticipant);
//!
//! // The next insert_participant call fails; the one after succeeds.
//! assert_eq!(store.calls(StoreOp::InsertParticipant), 1);
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use room_controller::registry::{Participant, Room, RoomSpec};
use room_controller::storage::{RoomStore, StoreError};

/// Store operations, used as keys for call counting and failure injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    InsertRoom,
    FetchRoom,
    ListActiveRooms,
    MarkRoomEnded,
    InsertParticipant,
    MarkParticipantLeft,
    ActiveParticipants,
    RecordChatMessage,
    Ping,
}

#[derive(Debug, Clone)]
struct MembershipRow {
    room_id: Uuid,
    user_id: String,
    joined_at: DateTime<Utc>,
    left_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct ChatRow {
    room_id: Uuid,
    user_id: String,
    body: String,
}

#[derive(Debug, Default)]
struct Inner {
    rooms: HashMap<Uuid, Room>,
    /// Append-only; insertion order matches join order.
    memberships: Vec<MembershipRow>,
    chat: Vec<ChatRow>,
    /// Operations whose next call fails. One-shot: consumed on trigger.
    fail_next: HashSet<StoreOp>,
    calls: HashMap<StoreOp, usize>,
}

impl Inner {
    /// Count the call and fire any injected failure for `op`.
    fn record(&mut self, op: StoreOp) -> Result<(), StoreError> {
        *self.calls.entry(op).or_insert(0) += 1;
        if self.fail_next.remove(&op) {
            return Err(StoreError::Unavailable(format!(
                "injected failure for {op:?}"
            )));
        }
        Ok(())
    }
}

/// In-memory store for testing the registry and the HTTP layer.
#[derive(Debug, Clone)]
pub struct MemoryRoomStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Make the next call of `op` fail with `StoreError::Unavailable`.
    pub fn inject_failure(&self, op: StoreOp) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_next.insert(op);
    }

    /// How many times `op` has been called, failed calls included.
    #[must_use]
    pub fn calls(&self, op: StoreOp) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of rooms in the store, ended ones included.
    #[must_use]
    pub fn room_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.rooms.len()
    }

    /// User IDs with an open membership row in `room_id`, in join order.
    #[must_use]
    pub fn live_participants(&self, room_id: Uuid) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .memberships
            .iter()
            .filter(|row| row.room_id == room_id && row.left_at.is_none())
            .map(|row| row.user_id.clone())
            .collect()
    }

    /// Recorded chat history for `room_id` as (user_id, body), in order.
    #[must_use]
    pub fn chat_messages(&self, room_id: Uuid) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        inner
            .chat
            .iter()
            .filter(|row| row.room_id == room_id)
            .map(|row| (row.user_id.clone(), row.body.clone()))
            .collect()
    }

    /// The stored room, if any, as the durable layer currently sees it.
    #[must_use]
    pub fn stored_room(&self, id: Uuid) -> Option<Room> {
        let inner = self.inner.lock().unwrap();
        inner.rooms.get(&id).cloned()
    }

    /// Put a live room directly into storage, bypassing the registry. Models
    /// a room created by a previous process.
    pub fn seed_room(&self, title: &str, is_temporary: bool, auto_delete: bool) -> Room {
        let room = Room::new(RoomSpec {
            title: title.to_string(),
            description: String::new(),
            owner_id: "owner".to_string(),
            language: "en".to_string(),
            is_private: false,
            is_temporary,
            auto_delete,
        });
        let mut inner = self.inner.lock().unwrap();
        inner.rooms.insert(room.id, room.clone());
        room
    }

    /// Put an already-ended room directly into storage.
    pub fn seed_ended_room(&self, title: &str) -> Room {
        let mut room = Room::new(RoomSpec {
            title: title.to_string(),
            description: String::new(),
            owner_id: "owner".to_string(),
            language: "en".to_string(),
            is_private: false,
            is_temporary: false,
            auto_delete: false,
        });
        room.ended_at = Some(Utc::now());
        let mut inner = self.inner.lock().unwrap();
        inner.rooms.insert(room.id, room.clone());
        room
    }

    /// Open a membership row directly, bypassing the registry. Models a row
    /// left over from a previous process.
    pub fn seed_participant(&self, room_id: Uuid, user_id: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.memberships.push(MembershipRow {
            room_id,
            user_id: user_id.to_string(),
            joined_at: Utc::now(),
            left_at: None,
        });
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::InsertRoom)?;

        if inner.rooms.contains_key(&room.id) {
            return Err(StoreError::Duplicate(format!("room {}", room.id)));
        }
        inner.rooms.insert(room.id, room.clone());
        Ok(())
    }

    async fn fetch_room(&self, id: Uuid) -> Result<Option<Room>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::FetchRoom)?;
        Ok(inner.rooms.get(&id).cloned())
    }

    async fn list_active_rooms(&self, limit: i64, offset: i64) -> Result<Vec<Room>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::ListActiveRooms)?;

        let mut rooms: Vec<Room> = inner
            .rooms
            .values()
            .filter(|room| !room.has_ended())
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = usize::try_from(offset).unwrap_or(0);
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(rooms.into_iter().skip(offset).take(limit).collect())
    }

    async fn mark_room_ended(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::MarkRoomEnded)?;

        // UPDATE semantics: a missing or already-ended room affects no rows.
        if let Some(room) = inner.rooms.get_mut(&id) {
            if room.ended_at.is_none() {
                room.ended_at = Some(at);
            }
        }
        for row in inner
            .memberships
            .iter_mut()
            .filter(|row| row.room_id == id && row.left_at.is_none())
        {
            row.left_at = Some(at);
        }
        Ok(())
    }

    async fn insert_participant(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::InsertParticipant)?;

        let open_exists = inner
            .memberships
            .iter()
            .any(|row| row.room_id == room_id && row.user_id == user_id && row.left_at.is_none());
        if open_exists {
            return Err(StoreError::Duplicate(format!(
                "open membership for user {user_id} in room {room_id}"
            )));
        }

        inner.memberships.push(MembershipRow {
            room_id,
            user_id: user_id.to_string(),
            joined_at: at,
            left_at: None,
        });
        Ok(())
    }

    async fn mark_participant_left(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::MarkParticipantLeft)?;

        // UPDATE semantics: no open row, no change.
        if let Some(row) = inner
            .memberships
            .iter_mut()
            .find(|row| row.room_id == room_id && row.user_id == user_id && row.left_at.is_none())
        {
            row.left_at = Some(at);
        }
        Ok(())
    }

    async fn active_participants(&self, room_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::ActiveParticipants)?;

        Ok(inner
            .memberships
            .iter()
            .filter(|row| row.room_id == room_id && row.left_at.is_none())
            .map(|row| Participant {
                user_id: row.user_id.clone(),
                joined_at: row.joined_at,
            })
            .collect())
    }

    async fn record_chat_message(
        &self,
        room_id: Uuid,
        user_id: &str,
        body: &str,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::RecordChatMessage)?;

        inner.chat.push(ChatRow {
            room_id,
            user_id: user_id.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.record(StoreOp::Ping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_and_fetch_room() {
        let store = MemoryRoomStore::new();
        let room = store.seed_room("seeded", false, false);

        let fetched = store.fetch_room(room.id).await.unwrap();
        assert_eq!(fetched.unwrap().title, "seeded");
        assert_eq!(store.calls(StoreOp::FetchRoom), 1);
    }

    #[tokio::test]
    async fn test_duplicate_room_insert_rejected() {
        let store = MemoryRoomStore::new();
        let room = store.seed_room("seeded", false, false);

        let err = store.insert_room(&room).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn test_failure_injection_is_one_shot() {
        let store = MemoryRoomStore::new();
        store.inject_failure(StoreOp::Ping);

        assert!(store.ping().await.is_err());
        assert!(store.ping().await.is_ok());
        assert_eq!(store.calls(StoreOp::Ping), 2);
    }

    #[tokio::test]
    async fn test_open_membership_row_is_unique() {
        let store = MemoryRoomStore::new();
        let room = store.seed_room("r", false, false);
        let now = Utc::now();

        store.insert_participant(room.id, "alice", now).await.unwrap();
        let err = store
            .insert_participant(room.id, "alice", now)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));

        // Closing the row makes the pair insertable again.
        store
            .mark_participant_left(room.id, "alice", now)
            .await
            .unwrap();
        store.insert_participant(room.id, "alice", now).await.unwrap();
        assert_eq!(store.live_participants(room.id), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_mark_room_ended_closes_open_rows_and_is_idempotent() {
        let store = MemoryRoomStore::new();
        let room = store.seed_room("r", false, false);
        let now = Utc::now();
        store.insert_participant(room.id, "alice", now).await.unwrap();

        store.mark_room_ended(room.id, now).await.unwrap();
        let first_end = store.stored_room(room.id).unwrap().ended_at;

        // Second end keeps the original timestamp.
        let later = now + chrono::Duration::seconds(30);
        store.mark_room_ended(room.id, later).await.unwrap();
        assert_eq!(store.stored_room(room.id).unwrap().ended_at, first_end);
        assert!(store.live_participants(room.id).is_empty());
    }

    #[tokio::test]
    async fn test_list_active_rooms_orders_and_paginates() {
        let store = MemoryRoomStore::new();
        let first = store.seed_room("first", false, false);
        let second = store.seed_room("second", false, false);
        store.seed_ended_room("over");

        // Creation timestamps are close; disambiguate them explicitly.
        {
            let mut inner = store.inner.lock().unwrap();
            inner.rooms.get_mut(&second.id).unwrap().created_at =
                first.created_at + chrono::Duration::seconds(1);
        }

        let listed = store.list_active_rooms(10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);

        let page = store.list_active_rooms(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, first.id);
    }
}
