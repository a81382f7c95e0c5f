//! Room lifecycle across process restarts.
//!
//! The registry keeps no warm state: everything it knows has to be
//! reconstructible from storage plus live traffic. These tests run two
//! registry instances over one store and check what the second one sees.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rc_test_utils::{ephemeral_room_spec, room_spec, MemoryRoomStore, StoreOp};
use room_controller::errors::RcError;
use room_controller::policy::AllowAll;
use room_controller::registry::{RoomRegistry, RoomSpec};

fn registry_over(store: &MemoryRoomStore) -> RoomRegistry {
    RoomRegistry::new(Arc::new(store.clone()), Arc::new(AllowAll))
}

fn temporary_spec(title: &str) -> RoomSpec {
    let mut spec = room_spec(title);
    spec.is_temporary = true;
    spec
}

#[tokio::test]
async fn test_rooms_survive_a_restart() -> Result<()> {
    let store = MemoryRoomStore::new();
    let first = registry_over(&store);

    let durable = first.create_room(room_spec("book club")).await?;
    let popup = first.create_room(ephemeral_room_spec("popup")).await?;
    first.join_room(durable.id, "alice").await?;
    first.join_room(popup.id, "bob").await?;
    // The process dies with members still joined.
    drop(first);

    // A fresh process sees the same rooms through storage, nothing cached.
    let second = registry_over(&store);
    assert_eq!(second.active_room_count().await, 0);
    let listed = second.list_active_rooms(50, 0).await?;
    assert_eq!(listed.len(), 2);

    // Reading one pulls it into the active set.
    let reloaded = second.get_room(durable.id).await?;
    assert_eq!(reloaded.title, "book club");
    assert!(second.is_active(durable.id).await);

    // Liveness belongs to the new process: the roster starts empty even
    // though alice's membership row is still open in storage.
    assert!(second.room_participants(durable.id).await?.is_empty());
    assert_eq!(store.live_participants(durable.id), ["alice"]);

    // Rejoining adopts the stale row rather than erroring on it.
    second.join_room(durable.id, "alice").await?;
    assert_eq!(second.room_participants(durable.id).await?.len(), 1);
    assert_eq!(store.live_participants(durable.id), ["alice"]);

    // Leaving closes it.
    second.leave_room(durable.id, "alice").await?;
    assert!(store.live_participants(durable.id).is_empty());

    // The popup still ends on empty in the new process.
    second.join_room(popup.id, "bob").await?;
    second.leave_room(popup.id, "bob").await?;
    assert!(second.get_room(popup.id).await?.has_ended());

    Ok(())
}

#[tokio::test]
async fn test_end_room_is_idempotent_across_restarts() -> Result<()> {
    let store = MemoryRoomStore::new();
    let first = registry_over(&store);
    let room = first.create_room(room_spec("one ending")).await?;
    first.end_room(room.id).await?;
    assert_eq!(store.calls(StoreOp::MarkRoomEnded), 1);
    drop(first);

    // The next process ends it again: accepted, but no second write.
    let second = registry_over(&store);
    second.end_room(room.id).await?;
    assert_eq!(store.calls(StoreOp::MarkRoomEnded), 1);
    assert!(second.get_room(room.id).await?.has_ended());

    Ok(())
}

#[tokio::test]
async fn test_sweep_closes_membership_rows_with_the_room() -> Result<()> {
    let store = MemoryRoomStore::new();
    let registry = registry_over(&store);
    let room = registry.create_room(temporary_spec("all-nighter")).await?;
    registry.join_room(room.id, "alice").await?;
    registry.join_room(room.id, "bob").await?;

    let swept = registry.sweep_expired(Duration::ZERO).await;
    assert_eq!(swept, vec![room.id]);

    // Room ended, roster gone, and every open membership row closed.
    assert!(!registry.is_active(room.id).await);
    let stored = store
        .stored_room(room.id)
        .ok_or_else(|| anyhow::anyhow!("room vanished from storage"))?;
    assert!(stored.has_ended());
    assert!(store.live_participants(room.id).is_empty());
    assert!(matches!(
        registry.room_participants(room.id).await,
        Err(RcError::NotFound(_))
    ));

    Ok(())
}
