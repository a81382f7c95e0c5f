//! Authoritative registry of live rooms.
//!
//! The in-memory active set is the authority for "currently live"; the
//! durable store is the authority for history and for listing. Creation
//! persists before the room becomes visible in memory, so a crash between
//! the two leaves no orphaned in-memory room. Joins go memory-first and are
//! rolled back if the durable write fails.
//!
//! Locking: the active map sits behind an async `RwLock` that is only held
//! long enough to clone an `Arc`. Each room carries its own `Mutex`, held
//! across the paired memory+storage mutation, so Join/Leave/End for one room
//! never interleave while unrelated rooms proceed independently.

mod room;

pub use room::{Participant, Room, RoomSpec};

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;
use uuid::Uuid;

use crate::errors::RcError;
use crate::observability::metrics;
use crate::policy::{AccessPolicy, RoomAction};
use crate::storage::{RoomStore, StoreError};

/// One active room: its current attributes plus the live participant set,
/// under the per-room lock.
struct RoomState {
    room: Room,
    participants: HashMap<String, Participant>,
    /// False while this entry is a cold load whose snapshot has not been
    /// revalidated against storage under the per-room lock. A cold fetch
    /// can race a concurrent end of the same room; the first mutation
    /// checks storage before trusting the snapshot.
    verified: bool,
}

struct ActiveRoom {
    state: Mutex<RoomState>,
}

/// Registry of currently active rooms.
pub struct RoomRegistry {
    active: RwLock<HashMap<Uuid, Arc<ActiveRoom>>>,
    store: Arc<dyn RoomStore>,
    policy: Arc<dyn AccessPolicy>,
}

impl RoomRegistry {
    pub fn new(store: Arc<dyn RoomStore>, policy: Arc<dyn AccessPolicy>) -> Self {
        RoomRegistry {
            active: RwLock::new(HashMap::new()),
            store,
            policy,
        }
    }

    /// Create a room. The durable insert happens before the room enters the
    /// active set.
    #[instrument(skip_all, fields(owner_id = %spec.owner_id, title = %spec.title))]
    pub async fn create_room(&self, spec: RoomSpec) -> Result<Room, RcError> {
        let room = Room::new(spec);

        self.store.insert_room(&room).await?;

        {
            let mut active = self.active.write().await;
            active.insert(
                room.id,
                Arc::new(ActiveRoom {
                    state: Mutex::new(RoomState {
                        room: room.clone(),
                        participants: HashMap::new(),
                        verified: true,
                    }),
                }),
            );
            metrics::set_active_rooms(active.len());
        }

        metrics::record_room_created();
        tracing::info!(
            target: "rc.registry",
            room_id = %room.id,
            is_temporary = room.is_temporary,
            auto_delete = room.auto_delete,
            "room created"
        );
        Ok(room)
    }

    /// Look up a room: active set first, durable store on a miss. A live
    /// room found only in storage is pulled into the active set; an ended
    /// one is returned as-is and stays out of it.
    #[instrument(skip_all, fields(room_id = %id))]
    pub async fn get_room(&self, id: Uuid) -> Result<Room, RcError> {
        if let Some(active) = self.lookup_active(id).await {
            return Ok(active.state.lock().await.room.clone());
        }

        let room = self
            .store
            .fetch_room(id)
            .await?
            .ok_or_else(|| RcError::NotFound(format!("room {id}")))?;

        if !room.has_ended() {
            self.cache_fill(room.clone()).await;
        }
        Ok(room)
    }

    /// Add a user to a room. Memory first, then storage; the in-memory
    /// addition is rolled back if the durable write fails.
    #[instrument(skip_all, fields(room_id = %id, user_id = %user_id))]
    pub async fn join_room(&self, id: Uuid, user_id: &str) -> Result<(), RcError> {
        self.policy.authorize(user_id, id, RoomAction::Join).await?;

        let active = self.ensure_active(id).await?;
        let mut state = active.state.lock().await;

        // The room may have ended while we waited for its lock.
        if state.room.has_ended() {
            return Err(RcError::RoomEnded(format!("room {id}")));
        }
        self.confirm_live(&mut state).await?;
        if state.participants.contains_key(user_id) {
            return Err(RcError::AlreadyJoined(format!(
                "user {user_id} in room {id}"
            )));
        }

        let joined_at = Utc::now();
        state.participants.insert(
            user_id.to_string(),
            Participant {
                user_id: user_id.to_string(),
                joined_at,
            },
        );

        match self.store.insert_participant(id, user_id, joined_at).await {
            Ok(()) => {}
            // An open membership row can survive a controller restart; the
            // memory insert above brings the two back in line.
            Err(StoreError::Duplicate(_)) => {
                tracing::debug!(
                    target: "rc.registry",
                    room_id = %id,
                    user_id = %user_id,
                    "membership row already open, reconciled"
                );
            }
            Err(err) => {
                state.participants.remove(user_id);
                return Err(err.into());
            }
        }

        tracing::debug!(
            target: "rc.registry",
            room_id = %id,
            user_id = %user_id,
            participants = state.participants.len(),
            "user joined room"
        );
        Ok(())
    }

    /// Remove a user from a room. An empty room with `auto_delete` set is
    /// ended as part of the same per-room critical section.
    #[instrument(skip_all, fields(room_id = %id, user_id = %user_id))]
    pub async fn leave_room(&self, id: Uuid, user_id: &str) -> Result<(), RcError> {
        let active = self
            .lookup_active(id)
            .await
            .ok_or_else(|| RcError::NotFound(format!("room {id}")))?;
        let mut state = active.state.lock().await;

        let participant = state
            .participants
            .remove(user_id)
            .ok_or_else(|| RcError::NotFound(format!("user {user_id} in room {id}")))?;

        let left_at = Utc::now();
        if let Err(err) = self.store.mark_participant_left(id, user_id, left_at).await {
            state.participants.insert(user_id.to_string(), participant);
            return Err(err.into());
        }

        tracing::debug!(
            target: "rc.registry",
            room_id = %id,
            user_id = %user_id,
            participants = state.participants.len(),
            "user left room"
        );

        if state.participants.is_empty() && state.room.auto_delete && !state.room.has_ended() {
            // Cascading transition: the leave itself already succeeded, so a
            // failure here is logged rather than surfaced to the leaver.
            if let Err(err) = self.end_locked(&mut state, "auto_delete").await {
                tracing::error!(
                    target: "rc.registry",
                    room_id = %id,
                    error = %err,
                    "failed to auto-delete empty room"
                );
            }
        }
        Ok(())
    }

    /// End a room. Ending an already-ended room is a no-op success.
    #[instrument(skip_all, fields(room_id = %id))]
    pub async fn end_room(&self, id: Uuid) -> Result<(), RcError> {
        // A room live only in storage (from before a restart) is pulled
        // through the active set first, so a concurrent join of the same
        // room contends on its per-room lock instead of racing the storage
        // write.
        let active = match self.ensure_active(id).await {
            Ok(active) => active,
            // Already terminal everywhere; ending again is a no-op.
            Err(RcError::RoomEnded(_)) => return Ok(()),
            Err(err) => return Err(err),
        };

        let mut state = active.state.lock().await;
        if state.room.has_ended() {
            self.remove_from_active(id).await;
            return Ok(());
        }
        match self.confirm_live(&mut state).await {
            Ok(()) => {}
            // Another task already ended it; nothing left to write.
            Err(RcError::RoomEnded(_)) => return Ok(()),
            Err(err) => return Err(err),
        }
        self.end_locked(&mut state, "explicit").await
    }

    /// Active rooms from durable storage, newest first: the paginated view
    /// must stay consistent across restarts, so memory is not consulted.
    #[instrument(skip_all, fields(limit, offset))]
    pub async fn list_active_rooms(&self, limit: i64, offset: i64) -> Result<Vec<Room>, RcError> {
        let rooms = self
            .store
            .list_active_rooms(limit.max(0), offset.max(0))
            .await?;
        Ok(rooms)
    }

    /// End every active room that is temporary and older than `ttl`.
    /// Returns the ids of the rooms that were ended, so the caller can
    /// close any connections still attached to them.
    pub async fn sweep_expired(&self, ttl: Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let snapshot: Vec<(Uuid, Arc<ActiveRoom>)> = {
            let active = self.active.read().await;
            active.iter().map(|(id, arc)| (*id, arc.clone())).collect()
        };

        let mut swept = Vec::new();
        for (id, active) in snapshot {
            let mut state = active.state.lock().await;
            if !state.room.expired(ttl, now) {
                continue;
            }
            match self.end_locked(&mut state, "expired").await {
                Ok(()) => {
                    swept.push(id);
                    tracing::info!(
                        target: "rc.registry",
                        room_id = %id,
                        created_at = %state.room.created_at,
                        "temporary room expired"
                    );
                }
                Err(err) => {
                    tracing::error!(
                        target: "rc.registry",
                        room_id = %id,
                        error = %err,
                        "failed to end expired room"
                    );
                }
            }
        }
        swept
    }

    /// Live participants of an active room, in join order.
    pub async fn room_participants(&self, id: Uuid) -> Result<Vec<Participant>, RcError> {
        let active = self
            .lookup_active(id)
            .await
            .ok_or_else(|| RcError::NotFound(format!("room {id}")))?;
        let state = active.state.lock().await;

        let mut participants: Vec<Participant> = state.participants.values().cloned().collect();
        participants.sort_by(|a, b| {
            a.joined_at
                .cmp(&b.joined_at)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(participants)
    }

    /// Whether a room is currently in the active set and not ended.
    pub async fn is_active(&self, id: Uuid) -> bool {
        match self.lookup_active(id).await {
            Some(active) => !active.state.lock().await.room.has_ended(),
            None => false,
        }
    }

    /// Number of rooms in the active set.
    pub async fn active_room_count(&self) -> usize {
        self.active.read().await.len()
    }

    async fn lookup_active(&self, id: Uuid) -> Option<Arc<ActiveRoom>> {
        self.active.read().await.get(&id).cloned()
    }

    /// Active entry for `id`, cold-loading from storage on a miss.
    async fn ensure_active(&self, id: Uuid) -> Result<Arc<ActiveRoom>, RcError> {
        if let Some(active) = self.lookup_active(id).await {
            return Ok(active);
        }

        let room = self
            .store
            .fetch_room(id)
            .await?
            .ok_or_else(|| RcError::NotFound(format!("room {id}")))?;
        if room.has_ended() {
            return Err(RcError::RoomEnded(format!("room {id}")));
        }
        Ok(self.cache_fill(room).await)
    }

    /// Insert a storage-loaded room into the active set unless a concurrent
    /// task beat us to it. Participants start empty: liveness is defined by
    /// this process, not by rows that predate it.
    async fn cache_fill(&self, room: Room) -> Arc<ActiveRoom> {
        let id = room.id;
        let mut active = self.active.write().await;
        let arc = active
            .entry(id)
            .or_insert_with(|| {
                Arc::new(ActiveRoom {
                    state: Mutex::new(RoomState {
                        room,
                        participants: HashMap::new(),
                        verified: false,
                    }),
                })
            })
            .clone();
        metrics::set_active_rooms(active.len());
        arc
    }

    /// Revalidate a cold-loaded snapshot against storage. Caller holds the
    /// per-room lock. A snapshot fetched before a concurrent end's durable
    /// write still says the room is open; trusting it would reopen an ended
    /// room here and leave an open membership row behind.
    async fn confirm_live(&self, state: &mut RoomState) -> Result<(), RcError> {
        if state.verified {
            return Ok(());
        }
        let id = state.room.id;
        let stored = self
            .store
            .fetch_room(id)
            .await?
            .ok_or_else(|| RcError::NotFound(format!("room {id}")))?;
        if stored.has_ended() {
            state.room.ended_at = stored.ended_at;
            state.participants.clear();
            self.remove_from_active(id).await;
            return Err(RcError::RoomEnded(format!("room {id}")));
        }
        state.room = stored;
        state.verified = true;
        Ok(())
    }

    /// Persist the end timestamp, then flip the in-memory state and drop the
    /// room from the active set. Caller holds the per-room lock.
    async fn end_locked(&self, state: &mut RoomState, reason: &'static str) -> Result<(), RcError> {
        let id = state.room.id;
        let ended_at = Utc::now();

        self.store.mark_room_ended(id, ended_at).await?;

        state.room.ended_at = Some(ended_at);
        state.participants.clear();
        self.remove_from_active(id).await;

        metrics::record_room_ended(reason);
        tracing::info!(target: "rc.registry", room_id = %id, reason, "room ended");
        Ok(())
    }

    async fn remove_from_active(&self, id: Uuid) {
        let mut active = self.active.write().await;
        active.remove(&id);
        metrics::set_active_rooms(active.len());
    }
}

// Unit tests for the registry live in `tests/registry_unit.rs`: the
// rc-test-utils mocks implement the externally linked copy of this
// crate, so they cannot be used inside the lib-test build.
