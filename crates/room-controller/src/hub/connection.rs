//! Per-connection tasks: one reader, one writer, and the surrounding
//! lifecycle (join, register, teardown).
//!
//! The reader enforces the inbound liveness deadline and routes envelopes;
//! the writer drains the outbound queue and emits periodic pings. Either
//! pump exiting cancels the pair's token so the other follows, and the
//! enclosing `run_connection` future then performs teardown exactly once:
//! deregister from the hub, and on the user's last connection, release
//! signaling state and leave the room.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::messages::{ConnectionId, DisconnectReason, OutboundFrame, RegisteredConnection};
use super::{HubHandle, CLOSE_GOING_AWAY, CLOSE_ROOM_ENDED};
use crate::config::Config;
use crate::errors::RcError;
use crate::observability::metrics;
use crate::protocol::{Envelope, MessageKind};
use crate::registry::RoomRegistry;
use crate::signaling::SignalingRelay;
use crate::storage::RoomStore;
use crate::transport::{Transport, TransportError, TransportReader, TransportWriter};

/// Liveness and pacing knobs for one connection's pumps.
#[derive(Debug, Clone, Copy)]
pub struct LivenessSettings {
    /// Reader closes the connection after this long without inbound traffic.
    pub pong_timeout: Duration,
    /// Writer emits a ping envelope at this cadence.
    pub ping_interval: Duration,
    /// Per-write deadline.
    pub write_timeout: Duration,
}

impl LivenessSettings {
    pub fn from_config(config: &Config) -> Self {
        LivenessSettings {
            pong_timeout: config.pong_timeout,
            ping_interval: config.ping_interval,
            write_timeout: config.write_timeout,
        }
    }
}

/// Everything a connection lifecycle needs from the rest of the subsystem.
#[derive(Clone)]
pub struct SessionDeps {
    pub hub: HubHandle,
    pub registry: Arc<RoomRegistry>,
    pub relay: Arc<SignalingRelay>,
    pub store: Arc<dyn RoomStore>,
    pub liveness: LivenessSettings,
}

/// Drive one connection from accept to teardown. This future is the parent
/// of both pumps and must be awaited (or spawned) by the transport accept
/// path.
#[instrument(skip_all, fields(room_id = %room_id, user_id = %user_id))]
pub async fn run_connection(
    deps: SessionDeps,
    transport: Box<dyn Transport>,
    room_id: Uuid,
    user_id: String,
) {
    // Membership first. A user may already be in the room (second device,
    // or joined over REST); that connection still gets accepted.
    let joined_now = match deps.registry.join_room(room_id, &user_id).await {
        Ok(()) => true,
        Err(RcError::AlreadyJoined(_)) => false,
        Err(err) => {
            reject(transport, &err, deps.liveness.write_timeout).await;
            return;
        }
    };

    let registered = match deps.hub.register(room_id, &user_id).await {
        Ok(registered) => registered,
        Err(err) => {
            if joined_now {
                if let Err(leave_err) = deps.registry.leave_room(room_id, &user_id).await {
                    warn!(
                        target: "rc.hub",
                        room_id = %room_id,
                        user_id = %user_id,
                        error = %leave_err,
                        "compensating leave failed after rejected register"
                    );
                }
            }
            reject(transport, &err, deps.liveness.write_timeout).await;
            return;
        }
    };

    let RegisteredConnection {
        connection_id,
        outbound,
        outbound_sender,
        cancel,
    } = registered;

    info!(
        target: "rc.hub",
        connection_id = %connection_id,
        room_id = %room_id,
        user_id = %user_id,
        "connection open"
    );

    let (reader, writer) = transport.into_split();

    let read_task = tokio::spawn(
        ReadPump {
            connection_id,
            room_id,
            user_id: user_id.clone(),
            reader,
            outbound: outbound_sender,
            hub: deps.hub.clone(),
            registry: deps.registry.clone(),
            relay: deps.relay.clone(),
            store: deps.store.clone(),
            pong_timeout: deps.liveness.pong_timeout,
            cancel: cancel.clone(),
        }
        .run(),
    );
    let write_task = tokio::spawn(
        WritePump {
            connection_id,
            writer,
            outbound,
            ping_interval: deps.liveness.ping_interval,
            write_timeout: deps.liveness.write_timeout,
            cancel: cancel.clone(),
        }
        .run(),
    );

    let (read_reason, write_reason) = tokio::join!(read_task, write_task);
    let read_reason = unwrap_pump(read_reason, "reader", connection_id);
    let write_reason = unwrap_pump(write_reason, "writer", connection_id);

    // The pump that died first carries the story; the other one only saw
    // the cancellation that followed.
    let reason = if read_reason == DisconnectReason::Cancelled {
        write_reason
    } else {
        read_reason
    };

    let outcome = deps
        .hub
        .deregister(connection_id, room_id, &user_id, reason)
        .await;

    if outcome.last_for_user {
        deps.relay.release_user(&user_id).await;
        match deps.registry.leave_room(room_id, &user_id).await {
            Ok(()) => {}
            Err(RcError::NotFound(_)) => {
                debug!(
                    target: "rc.hub",
                    room_id = %room_id,
                    user_id = %user_id,
                    "membership already gone at teardown"
                );
            }
            Err(err) => {
                warn!(
                    target: "rc.hub",
                    room_id = %room_id,
                    user_id = %user_id,
                    error = %err,
                    "failed to leave room at teardown"
                );
            }
        }
    }

    info!(
        target: "rc.hub",
        connection_id = %connection_id,
        room_id = %room_id,
        user_id = %user_id,
        reason = reason.as_str(),
        "connection closed"
    );
}

/// Close a never-registered transport with the error's close code.
async fn reject(transport: Box<dyn Transport>, err: &RcError, write_timeout: Duration) {
    debug!(target: "rc.hub", error = %err, "connection rejected");
    let (_, mut writer) = transport.into_split();
    let _ = timeout(write_timeout, writer.close(err.close_code(), err.error_code())).await;
}

fn unwrap_pump(
    result: Result<DisconnectReason, tokio::task::JoinError>,
    pump: &'static str,
    connection_id: ConnectionId,
) -> DisconnectReason {
    match result {
        Ok(reason) => reason,
        Err(join_err) => {
            error!(
                target: "rc.hub",
                connection_id = %connection_id,
                pump,
                error = ?join_err,
                "connection pump aborted"
            );
            DisconnectReason::TransportError
        }
    }
}

/// Inbound half: liveness deadline plus envelope routing.
struct ReadPump {
    connection_id: ConnectionId,
    room_id: Uuid,
    user_id: String,
    reader: Box<dyn TransportReader>,
    /// This connection's own queue, for direct replies (pong, answers).
    outbound: mpsc::Sender<OutboundFrame>,
    hub: HubHandle,
    registry: Arc<RoomRegistry>,
    relay: Arc<SignalingRelay>,
    store: Arc<dyn RoomStore>,
    pong_timeout: Duration,
    cancel: CancellationToken,
}

impl ReadPump {
    async fn run(mut self) -> DisconnectReason {
        let reason = self.pump().await;
        self.cancel.cancel();
        reason
    }

    async fn pump(&mut self) -> DisconnectReason {
        loop {
            // Any inbound frame counts as liveness, not just pongs.
            let frame = tokio::select! {
                () = self.cancel.cancelled() => return DisconnectReason::Cancelled,
                result = timeout(self.pong_timeout, self.reader.next_frame()) => result,
            };

            match frame {
                Err(_) => {
                    debug!(
                        target: "rc.hub",
                        connection_id = %self.connection_id,
                        "no inbound traffic within liveness window"
                    );
                    return DisconnectReason::IdleTimeout;
                }
                Ok(Ok(None)) => return DisconnectReason::PeerClosed,
                Ok(Ok(Some(text))) => {
                    if let Some(reason) = self.route(&text).await {
                        return reason;
                    }
                }
                Ok(Err(TransportError::TooLarge { limit })) => {
                    warn!(
                        target: "rc.hub",
                        connection_id = %self.connection_id,
                        limit,
                        "oversized inbound frame"
                    );
                    return DisconnectReason::Oversized;
                }
                Ok(Err(err)) => {
                    debug!(
                        target: "rc.hub",
                        connection_id = %self.connection_id,
                        error = %err,
                        "transport read failed"
                    );
                    return DisconnectReason::TransportError;
                }
            }
        }
    }

    /// Route one inbound envelope. `Some(reason)` ends the connection.
    async fn route(&self, text: &str) -> Option<DisconnectReason> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(
                    target: "rc.hub",
                    connection_id = %self.connection_id,
                    error = %err,
                    "malformed inbound frame"
                );
                return Some(DisconnectReason::Malformed);
            }
        };

        match envelope.kind {
            MessageKind::Chat => self.route_chat(envelope).await,

            MessageKind::SignalingOffer => self.route_offer(envelope).await,

            MessageKind::SignalingAnswer => {
                if let Err(err) = self.relay.mark_established(&self.user_id).await {
                    debug!(
                        target: "rc.signaling",
                        user_id = %self.user_id,
                        error = %err,
                        "answer ack without live session"
                    );
                }
                None
            }

            MessageKind::IceCandidate => {
                if let Err(err) = self
                    .relay
                    .handle_ice_candidate(&self.user_id, &envelope.body)
                    .await
                {
                    // Terminates nothing; the candidate is simply not applied.
                    warn!(
                        target: "rc.signaling",
                        user_id = %self.user_id,
                        error = %err,
                        "ice candidate rejected"
                    );
                }
                None
            }

            MessageKind::Ping => self.reply(Envelope::pong()),

            // Arrival already refreshed the deadline; clients do not emit
            // presence themselves.
            MessageKind::Pong | MessageKind::Presence => None,
        }
    }

    async fn route_chat(&self, envelope: Envelope) -> Option<DisconnectReason> {
        // The room can end underneath a live connection (owner end, expiry
        // sweep); an ended room takes no further messages.
        if !self.registry.is_active(self.room_id).await {
            debug!(
                target: "rc.hub",
                connection_id = %self.connection_id,
                room_id = %self.room_id,
                "chat for ended room refused"
            );
            return match self.outbound.try_send(OutboundFrame::Close {
                code: CLOSE_ROOM_ENDED,
                reason: "room ended",
            }) {
                // The writer flushes the close and cancels the pair.
                Ok(()) => None,
                Err(_) => Some(DisconnectReason::RoomEnded),
            };
        }

        // The server stamps room and sender; a client cannot speak as
        // someone else by forging envelope fields.
        let stamped = Envelope::chat(&self.room_id.to_string(), &self.user_id, envelope.body);

        let body_text = stamped.body.to_string();
        match self
            .store
            .record_chat_message(self.room_id, &self.user_id, &body_text, Utc::now())
            .await
        {
            Ok(()) => metrics::record_chat_message(),
            // History is best effort; delivery goes ahead regardless.
            Err(err) => {
                warn!(
                    target: "rc.hub",
                    room_id = %self.room_id,
                    user_id = %self.user_id,
                    error = %err,
                    "chat history write failed"
                );
            }
        }

        match stamped.encode() {
            Ok(text) => {
                if let Err(err) = self
                    .hub
                    .broadcast_to_room(self.room_id, Arc::from(text))
                    .await
                {
                    debug!(target: "rc.hub", error = %err, "broadcast refused");
                }
            }
            Err(err) => {
                warn!(target: "rc.hub", error = %err, "chat encode failed");
            }
        }
        None
    }

    async fn route_offer(&self, envelope: Envelope) -> Option<DisconnectReason> {
        // First offer over a connection may precede any session; later
        // offers renegotiate the one that exists.
        match self.relay.create_session(&self.user_id, self.room_id).await {
            Ok(_) | Err(RcError::AlreadyNegotiating(_)) => {}
            Err(err) => {
                warn!(
                    target: "rc.signaling",
                    user_id = %self.user_id,
                    error = %err,
                    "session create failed"
                );
                return None;
            }
        }

        match self.relay.handle_offer(&self.user_id, &envelope.body).await {
            Ok(answer) => self.reply(Envelope::signaling_answer(
                &self.room_id.to_string(),
                &self.user_id,
                answer,
            )),
            Err(err) => {
                // Ends only this negotiation; the connection and the rest
                // of the room are untouched, and the client learns nothing
                // beyond the missing answer.
                warn!(
                    target: "rc.signaling",
                    user_id = %self.user_id,
                    error = %err,
                    "offer rejected"
                );
                None
            }
        }
    }

    /// Queue a reply on this connection's own outbound path. A full queue
    /// here means the consumer is as stalled as any slow broadcast target.
    fn reply(&self, envelope: Envelope) -> Option<DisconnectReason> {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(target: "rc.hub", error = %err, "reply encode failed");
                return None;
            }
        };
        match self
            .outbound
            .try_send(OutboundFrame::Envelope(Arc::from(text)))
        {
            Ok(()) => None,
            Err(TrySendError::Full(_)) => Some(DisconnectReason::Backpressure),
            Err(TrySendError::Closed(_)) => Some(DisconnectReason::Cancelled),
        }
    }
}

/// Outbound half: queue drain plus ping cadence.
struct WritePump {
    connection_id: ConnectionId,
    writer: Box<dyn TransportWriter>,
    outbound: mpsc::Receiver<OutboundFrame>,
    ping_interval: Duration,
    write_timeout: Duration,
    cancel: CancellationToken,
}

impl WritePump {
    async fn run(mut self) -> DisconnectReason {
        let reason = self.pump().await;
        self.cancel.cancel();
        reason
    }

    async fn pump(&mut self) -> DisconnectReason {
        let ping_text =
            Envelope::ping().encode().unwrap_or_else(|_| String::from(r#"{"type":"ping"}"#));

        let mut ping = tokio::time::interval(self.ping_interval);
        // The interval fires immediately; a connection that just opened
        // does not need a probe yet.
        ping.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = timeout(
                        self.write_timeout,
                        self.writer.close(CLOSE_GOING_AWAY, "closing"),
                    )
                    .await;
                    return DisconnectReason::Cancelled;
                }

                _ = ping.tick() => {
                    if !self.write(&ping_text).await {
                        return DisconnectReason::WriteFailed;
                    }
                }

                frame = self.outbound.recv() => match frame {
                    None => {
                        let _ = timeout(
                            self.write_timeout,
                            self.writer.close(1000, "closed"),
                        )
                        .await;
                        return DisconnectReason::Cancelled;
                    }
                    Some(OutboundFrame::Envelope(text)) => {
                        if !self.write(&text).await {
                            return DisconnectReason::WriteFailed;
                        }
                    }
                    Some(OutboundFrame::Close { code, reason }) => {
                        let _ = timeout(
                            self.write_timeout,
                            self.writer.close(code, reason),
                        )
                        .await;
                        return DisconnectReason::Cancelled;
                    }
                },
            }
        }
    }

    async fn write(&mut self, text: &str) -> bool {
        match timeout(self.write_timeout, self.writer.send_text(text)).await {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                debug!(
                    target: "rc.hub",
                    connection_id = %self.connection_id,
                    error = %err,
                    "write failed"
                );
                false
            }
            Err(_) => {
                debug!(
                    target: "rc.hub",
                    connection_id = %self.connection_id,
                    "write deadline exceeded"
                );
                false
            }
        }
    }
}
