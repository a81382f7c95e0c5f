//! Room sweeper unit tests, moved out of `src/tasks/room_sweeper.rs`.
//!
//! These live as an integration test target because `rc-test-utils`
//! depends on `room-controller`: inside the lib-test build its
//! `MemoryRoomStore` implements the `RoomStore` trait of a *second* copy
//! of the crate, so the `Arc<dyn RoomStore>` casts can never compile
//! there. Linked as an external crate there is only one copy.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rc_test_utils::MemoryRoomStore;
use room_controller::hub::{ConnectionHub, HubHandle};
use room_controller::policy::AllowAll;
use room_controller::registry::{RoomRegistry, RoomSpec};
use room_controller::tasks::{run_sweep, start_room_sweeper};
use tokio_util::sync::CancellationToken;

fn spawn_hub() -> HubHandle {
    let (hub, _task) =
        ConnectionHub::spawn(8, Duration::from_millis(100), CancellationToken::new());
    hub
}

fn temp_spec(title: &str) -> RoomSpec {
    RoomSpec {
        title: title.to_string(),
        description: String::new(),
        owner_id: "owner".to_string(),
        language: "en".to_string(),
        is_private: false,
        is_temporary: true,
        auto_delete: false,
    }
}

#[tokio::test]
async fn test_run_sweep_ends_expired_rooms() {
    let store = MemoryRoomStore::new();
    let registry = Arc::new(RoomRegistry::new(
        Arc::new(store.clone()),
        Arc::new(AllowAll),
    ));
    let room = registry.create_room(temp_spec("stale")).await.unwrap();

    run_sweep(&registry, &spawn_hub(), Duration::ZERO).await;

    assert!(!registry.is_active(room.id).await);
    assert!(registry.get_room(room.id).await.unwrap().has_ended());
}

#[tokio::test]
async fn test_sweeper_loop_sweeps_and_stops_on_cancel() {
    let store = MemoryRoomStore::new();
    let registry = Arc::new(RoomRegistry::new(
        Arc::new(store.clone()),
        Arc::new(AllowAll),
    ));
    let room = registry.create_room(temp_spec("stale")).await.unwrap();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(start_room_sweeper(
        registry.clone(),
        spawn_hub(),
        Duration::ZERO,
        Duration::from_millis(10),
        cancel.clone(),
    ));

    // First tick fires immediately; wait for its effect.
    for _ in 0..100 {
        if !registry.is_active(room.id).await {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!registry.is_active(room.id).await);

    cancel.cancel();
    task.await.unwrap();
}
