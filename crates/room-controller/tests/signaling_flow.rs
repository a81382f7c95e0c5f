//! Media negotiation driven over live connections.
//!
//! Exercises the signaling relay through the same path production traffic
//! takes: offer envelopes in through a connection's read pump, answers back
//! out through its write pump, and session lifetime tied to the connection.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use rc_test_utils::{
    calm_liveness, room_spec, ChannelTransport, MemoryRoomStore, MockMediaEndpoint, TestClient,
};
use room_controller::hub::{run_connection, ConnectionHub, SessionDeps};
use room_controller::policy::AllowAll;
use room_controller::protocol::{Envelope, MessageKind};
use room_controller::registry::RoomRegistry;
use room_controller::signaling::{LinkPhase, SignalingRelay};

struct Harness {
    deps: SessionDeps,
    registry: Arc<RoomRegistry>,
    relay: Arc<SignalingRelay>,
    media: MockMediaEndpoint,
}

fn harness_with_media(media: MockMediaEndpoint) -> Harness {
    let store = MemoryRoomStore::new();
    let registry = Arc::new(RoomRegistry::new(
        Arc::new(store.clone()),
        Arc::new(AllowAll),
    ));
    let relay = Arc::new(SignalingRelay::new(Arc::new(media.clone())));
    let (hub, _hub_task) =
        ConnectionHub::spawn(64, Duration::from_secs(1), CancellationToken::new());
    let deps = SessionDeps {
        hub,
        registry: Arc::clone(&registry),
        relay: Arc::clone(&relay),
        store: Arc::new(store),
        liveness: calm_liveness(),
    };
    Harness {
        deps,
        registry,
        relay,
        media,
    }
}

fn connect(harness: &Harness, room_id: Uuid, user_id: &str) -> (JoinHandle<()>, TestClient) {
    let (transport, client) = ChannelTransport::pair();
    let task = tokio::spawn(run_connection(
        harness.deps.clone(),
        Box::new(transport),
        room_id,
        user_id.to_string(),
    ));
    (task, client)
}

async fn next_envelope(client: &mut TestClient) -> Envelope {
    serde_json::from_value(client.recv_frame().await).unwrap()
}

async fn expect_presence(client: &mut TestClient, user_id: &str, event: &str) {
    let envelope = next_envelope(client).await;
    assert_eq!(envelope.kind, MessageKind::Presence);
    assert_eq!(envelope.user_id, user_id);
    assert_eq!(
        envelope.body.get("event").and_then(Value::as_str),
        Some(event)
    );
}

/// Frames on one connection are routed in order, so a pong reply proves
/// every frame sent before the ping has been fully processed.
async fn ping_barrier(client: &mut TestClient) {
    client.send_json(&json!({"type": "ping"}));
    let envelope = next_envelope(client).await;
    assert_eq!(envelope.kind, MessageKind::Pong);
}

fn offer_frame(sdp: &str) -> Value {
    json!({
        "type": "signaling-offer",
        "body": { "type": "offer", "sdp": sdp },
    })
}

async fn offer_and_receive_answer(client: &mut TestClient, sdp: &str) -> Envelope {
    client.send_json(&offer_frame(sdp));
    let envelope = next_envelope(client).await;
    assert_eq!(envelope.kind, MessageKind::SignalingAnswer);
    envelope
}

#[tokio::test]
async fn test_offer_answer_ack_establishes_a_peer_link() {
    let harness = harness_with_media(MockMediaEndpoint::answering());
    let room = harness
        .registry
        .create_room(room_spec("negotiate"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;

    let answer = offer_and_receive_answer(&mut client, "v=0 client").await;
    assert_eq!(answer.room_id, room.id.to_string());
    assert_eq!(answer.user_id, "alice");
    assert_eq!(
        answer.body.get("type").and_then(Value::as_str),
        Some("answer")
    );
    assert_eq!(harness.media.answer_calls(), 1);

    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.phase, LinkPhase::Negotiating);
    assert_eq!(link.room_id, room.id);

    // The client acknowledges the answer; the link flips to established.
    client.send_json(&json!({
        "type": "signaling-answer",
        "body": { "type": "answer", "sdp": "v=0 applied" },
    }));
    ping_barrier(&mut client).await;

    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.phase, LinkPhase::Established);

    client.close();
    task.await.unwrap();
}

#[tokio::test]
async fn test_renegotiation_reuses_the_session() {
    let harness = harness_with_media(MockMediaEndpoint::answering());
    let room = harness
        .registry
        .create_room(room_spec("take two"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;

    offer_and_receive_answer(&mut client, "v=0 first").await;
    client.send_json(&json!({
        "type": "signaling-answer",
        "body": { "type": "answer", "sdp": "v=0 applied" },
    }));
    ping_barrier(&mut client).await;

    // A later offer on the established link re-enters negotiation instead
    // of being refused.
    offer_and_receive_answer(&mut client, "v=0 second").await;
    assert_eq!(harness.media.answer_calls(), 2);

    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.phase, LinkPhase::Negotiating);
    assert_eq!(harness.relay.live_session_count().await, 1);

    client.close();
    task.await.unwrap();
}

#[tokio::test]
async fn test_ice_candidates_reach_the_media_plane() {
    let harness = harness_with_media(MockMediaEndpoint::answering());
    let room = harness
        .registry
        .create_room(room_spec("trickle"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;
    offer_and_receive_answer(&mut client, "v=0 client").await;

    client.send_json(&json!({
        "type": "ice-candidate",
        "body": { "candidate": "candidate:1 1 udp 2130706431 10.0.0.1 54401 typ host" },
    }));
    // The empty candidate is the trickle end-of-candidates marker.
    client.send_json(&json!({
        "type": "ice-candidate",
        "body": { "candidate": "" },
    }));
    ping_barrier(&mut client).await;

    assert_eq!(harness.media.candidate_calls(), 2);
    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.candidate_count, 2);

    client.close();
    task.await.unwrap();
}

#[tokio::test]
async fn test_candidate_without_a_session_is_not_applied() {
    let harness = harness_with_media(MockMediaEndpoint::answering());
    let room = harness
        .registry
        .create_room(room_spec("eager"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;

    // No offer yet. The candidate is dropped, the connection is not.
    client.send_json(&json!({
        "type": "ice-candidate",
        "body": { "candidate": "candidate:1 1 udp 2130706431 10.0.0.1 54401 typ host" },
    }));
    ping_barrier(&mut client).await;

    assert_eq!(harness.media.candidate_calls(), 0);
    assert!(harness.relay.snapshot("alice").await.is_none());

    client.close();
    task.await.unwrap();
}

#[tokio::test]
async fn test_media_outage_fails_the_offer_but_not_the_connection() {
    let harness = harness_with_media(MockMediaEndpoint::failing());
    let room = harness
        .registry
        .create_room(room_spec("mixer down"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;

    // The offer reaches the media plane and fails there. No answer comes
    // back: the next frame the client sees is the pong.
    client.send_json(&offer_frame("v=0 client"));
    ping_barrier(&mut client).await;
    assert_eq!(harness.media.answer_calls(), 1);

    // The session is still negotiating, and a retry goes back to the media
    // plane rather than being swallowed.
    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.phase, LinkPhase::Negotiating);

    client.send_json(&offer_frame("v=0 retry"));
    ping_barrier(&mut client).await;
    assert_eq!(harness.media.answer_calls(), 2);

    client.close();
    task.await.unwrap();
}

#[tokio::test]
async fn test_disconnect_releases_the_session_and_reconnect_starts_fresh() {
    let harness = harness_with_media(MockMediaEndpoint::answering());
    let room = harness
        .registry
        .create_room(room_spec("come back"))
        .await
        .unwrap();

    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;
    offer_and_receive_answer(&mut client, "v=0 client").await;
    client.send_json(&json!({
        "type": "ice-candidate",
        "body": { "candidate": "candidate:1 1 udp 2130706431 10.0.0.1 54401 typ host" },
    }));
    ping_barrier(&mut client).await;
    assert_eq!(harness.relay.live_session_count().await, 1);

    client.close();
    task.await.unwrap();

    // Teardown released the media resources and forgot the session.
    assert_eq!(harness.media.release_calls(), 1);
    assert!(harness.relay.snapshot("alice").await.is_none());
    assert_eq!(harness.relay.live_session_count().await, 0);

    // Reconnecting negotiates from scratch, with no candidates carried over.
    let (task, mut client) = connect(&harness, room.id, "alice");
    expect_presence(&mut client, "alice", "joined").await;
    offer_and_receive_answer(&mut client, "v=0 again").await;
    assert_eq!(harness.media.answer_calls(), 2);

    let link = harness.relay.snapshot("alice").await.unwrap();
    assert_eq!(link.phase, LinkPhase::Negotiating);
    assert_eq!(link.candidate_count, 0);

    client.close();
    task.await.unwrap();
    assert_eq!(harness.media.release_calls(), 2);
}
