//! Postgres-backed `RoomStore`.
//!
//! Expected schema (provisioned externally):
//!
//! ```sql
//! CREATE TABLE rooms (
//!     id           UUID PRIMARY KEY,
//!     title        TEXT NOT NULL,
//!     description  TEXT NOT NULL DEFAULT '',
//!     owner_id     TEXT NOT NULL,
//!     language     TEXT NOT NULL DEFAULT '',
//!     is_private   BOOLEAN NOT NULL DEFAULT FALSE,
//!     is_temporary BOOLEAN NOT NULL DEFAULT FALSE,
//!     auto_delete  BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at   TIMESTAMPTZ NOT NULL,
//!     ended_at     TIMESTAMPTZ
//! );
//!
//! CREATE TABLE room_participants (
//!     id        BIGSERIAL PRIMARY KEY,
//!     room_id   UUID NOT NULL REFERENCES rooms(id),
//!     user_id   TEXT NOT NULL,
//!     joined_at TIMESTAMPTZ NOT NULL,
//!     left_at   TIMESTAMPTZ
//! );
//! CREATE UNIQUE INDEX room_participants_live
//!     ON room_participants (room_id, user_id) WHERE left_at IS NULL;
//!
//! CREATE TABLE chat_messages (
//!     id      BIGSERIAL PRIMARY KEY,
//!     room_id UUID NOT NULL REFERENCES rooms(id),
//!     user_id TEXT NOT NULL,
//!     body    TEXT NOT NULL,
//!     sent_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! All queries are parameterized. Row structs stay private; callers see the
//! domain types only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::registry::{Participant, Room};
use crate::storage::{RoomStore, StoreError};

/// Durable store backed by a Postgres pool.
#[derive(Clone)]
pub struct PgRoomStore {
    pool: PgPool,
}

impl PgRoomStore {
    pub fn new(pool: PgPool) -> Self {
        PgRoomStore { pool }
    }
}

#[async_trait]
impl RoomStore for PgRoomStore {
    #[instrument(skip_all, fields(room_id = %room.id))]
    async fn insert_room(&self, room: &Room) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO rooms
                (id, title, description, owner_id, language,
                 is_private, is_temporary, auto_delete, created_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(room.id)
        .bind(&room.title)
        .bind(&room.description)
        .bind(&room.owner_id)
        .bind(&room.language)
        .bind(room.is_private)
        .bind(room.is_temporary)
        .bind(room.auto_delete)
        .bind(room.created_at)
        .bind(room.ended_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Duplicate(format!("room {}", room.id)));
        }
        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %id))]
    async fn fetch_room(&self, id: Uuid) -> Result<Option<Room>, StoreError> {
        let row: Option<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, owner_id, language,
                   is_private, is_temporary, auto_delete, created_at, ended_at
            FROM rooms
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(Room::from))
    }

    #[instrument(skip_all, fields(limit, offset))]
    async fn list_active_rooms(&self, limit: i64, offset: i64) -> Result<Vec<Room>, StoreError> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, owner_id, language,
                   is_private, is_temporary, auto_delete, created_at, ended_at
            FROM rooms
            WHERE ended_at IS NULL
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows.into_iter().map(Room::from).collect())
    }

    #[instrument(skip_all, fields(room_id = %id))]
    async fn mark_room_ended(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;

        sqlx::query(
            r#"
            UPDATE rooms SET ended_at = $2
            WHERE id = $1 AND ended_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        sqlx::query(
            r#"
            UPDATE room_participants SET left_at = $2
            WHERE room_id = $1 AND left_at IS NULL
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx)?;

        tx.commit().await.map_err(map_sqlx)
    }

    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    async fn insert_participant(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO room_participants (room_id, user_id, joined_at)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    async fn mark_participant_left(
        &self,
        room_id: Uuid,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE room_participants SET left_at = $3
            WHERE room_id = $1 AND user_id = $2 AND left_at IS NULL
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    #[instrument(skip_all, fields(room_id = %room_id))]
    async fn active_participants(&self, room_id: Uuid) -> Result<Vec<Participant>, StoreError> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(
            r#"
            SELECT user_id, joined_at
            FROM room_participants
            WHERE room_id = $1 AND left_at IS NULL
            ORDER BY joined_at
            "#,
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|r| Participant {
                user_id: r.user_id,
                joined_at: r.joined_at,
            })
            .collect())
    }

    #[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
    async fn record_chat_message(
        &self,
        room_id: Uuid,
        user_id: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (room_id, user_id, body, sent_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(room_id)
        .bind(user_id)
        .bind(body)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }
}

fn map_sqlx(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.message().to_string())
        }
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => StoreError::Unavailable(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: Uuid,
    title: String,
    description: String,
    owner_id: String,
    language: String,
    is_private: bool,
    is_temporary: bool,
    auto_delete: bool,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl From<RoomRow> for Room {
    fn from(row: RoomRow) -> Self {
        Room {
            id: row.id,
            title: row.title,
            description: row.description,
            owner_id: row.owner_id,
            language: row.language,
            is_private: row.is_private,
            is_temporary: row.is_temporary,
            auto_delete: row.auto_delete,
            created_at: row.created_at,
            ended_at: row.ended_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    user_id: String,
    joined_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_row_mapping_preserves_flags() {
        let now = Utc::now();
        let row = RoomRow {
            id: Uuid::new_v4(),
            title: "t".into(),
            description: "d".into(),
            owner_id: "o".into(),
            language: "en".into(),
            is_private: true,
            is_temporary: true,
            auto_delete: false,
            created_at: now,
            ended_at: Some(now),
        };

        let room = Room::from(row);
        assert!(room.is_private);
        assert!(room.is_temporary);
        assert!(!room.auto_delete);
        assert!(room.has_ended());
    }
}
