//! Room and participant domain types.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Caller-supplied attributes for a new room.
#[derive(Debug, Clone)]
pub struct RoomSpec {
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub language: String,
    pub is_private: bool,
    pub is_temporary: bool,
    pub auto_delete: bool,
}

/// A live audio room.
///
/// `ended_at` set means the room is terminal: it accepts no new participants
/// and no messages, and never re-enters the active set.
#[derive(Debug, Clone, Serialize)]
pub struct Room {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner_id: String,
    pub language: String,
    pub is_private: bool,
    pub is_temporary: bool,
    pub auto_delete: bool,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Room {
    /// Build a fresh room from caller attributes.
    pub fn new(spec: RoomSpec) -> Self {
        Room {
            id: Uuid::new_v4(),
            title: spec.title,
            description: spec.description,
            owner_id: spec.owner_id,
            language: spec.language,
            is_private: spec.is_private,
            is_temporary: spec.is_temporary,
            auto_delete: spec.auto_delete,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn has_ended(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Whether the expiry sweep should end this room at `now`.
    pub fn expired(&self, ttl: std::time::Duration, now: DateTime<Utc>) -> bool {
        if !self.is_temporary || self.has_ended() {
            return false;
        }
        (now - self.created_at)
            .to_std()
            .map(|age| age > ttl)
            .unwrap_or(false)
    }
}

/// A user's live membership in one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub user_id: String,
    pub joined_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn spec() -> RoomSpec {
        RoomSpec {
            title: "morning standup".to_string(),
            description: String::new(),
            owner_id: "alice".to_string(),
            language: "en".to_string(),
            is_private: false,
            is_temporary: true,
            auto_delete: false,
        }
    }

    #[test]
    fn test_new_room_is_active() {
        let room = Room::new(spec());
        assert!(!room.has_ended());
        assert!(room.ended_at.is_none());
    }

    #[test]
    fn test_expired_only_for_old_temporary_rooms() {
        let ttl = std::time::Duration::from_secs(24 * 3600);
        let mut room = Room::new(spec());
        let now = room.created_at;

        // Fresh room is inside the TTL.
        assert!(!room.expired(ttl, now));

        // Past the TTL.
        let later = now + chrono::Duration::hours(25);
        assert!(room.expired(ttl, later));

        // Non-temporary rooms never expire.
        room.is_temporary = false;
        assert!(!room.expired(ttl, later));

        // Already-ended rooms are not re-ended.
        room.is_temporary = true;
        room.ended_at = Some(later);
        assert!(!room.expired(ttl, later));

        // A clock skewed before creation never counts as expired.
        room.ended_at = None;
        assert!(!room.expired(ttl, now - chrono::Duration::hours(1)));
    }
}
