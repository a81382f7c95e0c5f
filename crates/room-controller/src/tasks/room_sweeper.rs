//! Temporary-room expiry sweeper.
//!
//! Temporary rooms have a bounded lifetime; the sweeper walks the active set
//! on an interval and ends any temporary room older than the configured TTL.
//! Durable rooms are never touched, no matter how old or empty.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token fires, after completing any
//! sweep already in progress.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::hub::HubHandle;
use crate::registry::RoomRegistry;

/// Start the room sweeper. Returns when the cancellation token fires.
#[instrument(skip_all, name = "rc.task.room_sweeper")]
pub async fn start_room_sweeper(
    registry: Arc<RoomRegistry>,
    hub: HubHandle,
    ttl: Duration,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rc.task.room_sweeper",
        ttl_secs = ttl.as_secs(),
        sweep_interval_secs = sweep_interval.as_secs(),
        "starting room sweeper"
    );

    let mut interval = tokio::time::interval(sweep_interval);
    // A sweep that overruns its slot should not be followed by a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(&registry, &hub, ttl).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "rc.task.room_sweeper",
                    "room sweeper received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "rc.task.room_sweeper", "room sweeper stopped");
}

/// One sweep iteration. Split out so tests can drive it directly.
pub async fn run_sweep(registry: &RoomRegistry, hub: &HubHandle, ttl: Duration) {
    let ended = registry.sweep_expired(ttl).await;
    if ended.is_empty() {
        return;
    }
    info!(
        target: "rc.task.room_sweeper",
        swept = ended.len(),
        "ended expired temporary rooms"
    );
    // Anyone still connected to a swept room gets a room-ended close.
    for room_id in ended {
        if let Err(err) = hub.close_room(room_id).await {
            debug!(
                target: "rc.task.room_sweeper",
                room_id = %room_id,
                error = %err,
                "room close fan-out skipped"
            );
        }
    }
}

// Unit tests for the sweeper live in `tests/room_sweeper_unit.rs`: the
// rc-test-utils mocks implement the externally linked copy of this
// crate, so they cannot be used inside the lib-test build.
