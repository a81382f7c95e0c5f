//! Commands understood by the hub coordination task, and the types it
//! answers with.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::RcError;

/// Identifier of one live connection.
pub type ConnectionId = Uuid;

/// One unit of outbound work for a connection's writer.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Pre-encoded envelope text, shared across recipients of a fan-out.
    Envelope(Arc<str>),
    /// Close the connection after flushing what came before.
    Close { code: u16, reason: &'static str },
}

/// Why a connection left the active set. Used for logs and drop metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Peer closed the channel or went away.
    PeerClosed,
    /// No inbound traffic within the liveness window.
    IdleTimeout,
    /// An outbound write failed or timed out.
    WriteFailed,
    /// Inbound frame was not a valid envelope.
    Malformed,
    /// Inbound frame exceeded the size limit.
    Oversized,
    /// Transport-level failure.
    TransportError,
    /// Outbound queue overflowed; the consumer was too slow.
    Backpressure,
    /// The room this connection lived in has ended.
    RoomEnded,
    /// Cancelled by the hub or subsystem shutdown.
    Cancelled,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::PeerClosed => "peer_closed",
            DisconnectReason::IdleTimeout => "idle_timeout",
            DisconnectReason::WriteFailed => "write_failed",
            DisconnectReason::Malformed => "malformed",
            DisconnectReason::Oversized => "oversized",
            DisconnectReason::TransportError => "transport_error",
            DisconnectReason::Backpressure => "backpressure",
            DisconnectReason::RoomEnded => "room_ended",
            DisconnectReason::Cancelled => "cancelled",
        }
    }
}

/// What a successful register hands back to the connection tasks.
#[derive(Debug)]
pub struct RegisteredConnection {
    /// Hub-assigned connection identifier.
    pub connection_id: ConnectionId,
    /// Outbound queue feeding this connection's writer.
    pub outbound: mpsc::Receiver<OutboundFrame>,
    /// Sender half for the connection's own replies (pong, answers).
    pub outbound_sender: mpsc::Sender<OutboundFrame>,
    /// Token cancelling both pumps of this connection.
    pub cancel: CancellationToken,
}

/// What deregistration reports back to the teardown path.
#[derive(Debug, Clone, Copy)]
pub struct DeregisterOutcome {
    /// Whether the hub still held the connection (false after a forced drop).
    pub was_registered: bool,
    /// True when the user has no remaining connections in that room, so the
    /// caller owns membership and signaling cleanup.
    pub last_for_user: bool,
}

/// Hub occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
}

/// Requests processed by the hub coordination task, strictly in order.
pub enum HubCommand {
    Register {
        room_id: Uuid,
        user_id: String,
        respond_to: oneshot::Sender<Result<RegisteredConnection, RcError>>,
    },
    Deregister {
        connection_id: ConnectionId,
        /// Room and user travel with the command so a forced drop that
        /// already removed the entry can still resolve `last_for_user`.
        room_id: Uuid,
        user_id: String,
        reason: DisconnectReason,
        respond_to: oneshot::Sender<DeregisterOutcome>,
    },
    Broadcast {
        room_id: Uuid,
        frame: Arc<str>,
    },
    SendToUser {
        room_id: Uuid,
        user_id: String,
        frame: Arc<str>,
    },
    /// Close every connection in a room; issued when the room ends while
    /// clients are still attached.
    CloseRoom {
        room_id: Uuid,
    },
    GetStats {
        respond_to: oneshot::Sender<HubStats>,
    },
}
