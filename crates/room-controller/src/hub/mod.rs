//! Connection hub: the one task allowed to touch the live connection set.
//!
//! All register/deregister/fan-out requests funnel through a single mpsc
//! queue and are processed strictly in order, so the connection set never
//! sees interleaved mutation. Delivery to a connection is a bounded
//! `try_send` into its outbound queue: a consumer that cannot keep up is
//! dropped on the spot rather than allowed to stall the loop, and nothing
//! here ever awaits mid-command.
//!
//! Presence fan-out is owned by the hub: the first connection a user brings
//! to a room announces `joined`, the last one to go announces `left`.

mod connection;
mod messages;

pub use connection::{run_connection, LivenessSettings, SessionDeps};
pub use messages::{
    ConnectionId, DeregisterOutcome, DisconnectReason, HubCommand, HubStats, OutboundFrame,
    RegisteredConnection,
};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::errors::RcError;
use crate::observability::metrics;
use crate::protocol::{Envelope, PresenceEvent};

/// Command buffer for the hub mailbox.
const HUB_CHANNEL_BUFFER: usize = 500;

/// How often the hub sweeps for entries whose writer vanished without a
/// deregister (a torn-down task that never reported back).
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Close code sent when the server is going away.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Close code sent when the room a connection lives in has ended. Matches
/// `RcError::RoomEnded.close_code()`.
const CLOSE_ROOM_ENDED: u16 = 4410;

/// Handle to the hub coordination task.
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    cancel_token: CancellationToken,
}

impl HubHandle {
    /// Register a connection for `user_id` in `room_id`. The hub assigns
    /// the connection id and hands back the outbound queue and cancel token
    /// the connection's pumps run on.
    pub async fn register(
        &self,
        room_id: Uuid,
        user_id: &str,
    ) -> Result<RegisteredConnection, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::Register {
                room_id,
                user_id: user_id.to_string(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RcError::Draining)?;

        rx.await
            .map_err(|_| RcError::Draining)?
    }

    /// Remove a connection from the active set. Reports whether the caller
    /// now owns membership cleanup for the user. Infallible: a hub that is
    /// already gone means every connection is being torn down anyway.
    pub async fn deregister(
        &self,
        connection_id: ConnectionId,
        room_id: Uuid,
        user_id: &str,
        reason: DisconnectReason,
    ) -> DeregisterOutcome {
        let gone = DeregisterOutcome {
            was_registered: false,
            last_for_user: true,
        };

        let (tx, rx) = oneshot::channel();
        let sent = self
            .sender
            .send(HubCommand::Deregister {
                connection_id,
                room_id,
                user_id: user_id.to_string(),
                reason,
                respond_to: tx,
            })
            .await;
        if sent.is_err() {
            return gone;
        }
        rx.await.unwrap_or(gone)
    }

    /// Fan a pre-encoded frame out to every connection in a room.
    pub async fn broadcast_to_room(&self, room_id: Uuid, frame: Arc<str>) -> Result<(), RcError> {
        self.sender
            .send(HubCommand::Broadcast { room_id, frame })
            .await
            .map_err(|_| RcError::Draining)
    }

    /// Deliver a pre-encoded frame to every connection one user holds in a
    /// room. No-op if the user is not connected.
    pub async fn send_to_user(
        &self,
        room_id: Uuid,
        user_id: &str,
        frame: Arc<str>,
    ) -> Result<(), RcError> {
        self.sender
            .send(HubCommand::SendToUser {
                room_id,
                user_id: user_id.to_string(),
                frame,
            })
            .await
            .map_err(|_| RcError::Draining)
    }

    /// Close every connection in a room with a room-ended close frame. The
    /// end paths call this so clients do not keep a channel into a room
    /// that is already terminal.
    pub async fn close_room(&self, room_id: Uuid) -> Result<(), RcError> {
        self.sender
            .send(HubCommand::CloseRoom { room_id })
            .await
            .map_err(|_| RcError::Draining)
    }

    /// Current occupancy.
    pub async fn stats(&self) -> Result<HubStats, RcError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| RcError::Draining)?;
        rx.await
            .map_err(|_| RcError::Draining)
    }

    /// Begin shutdown: the hub drains and then force-closes stragglers.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// One live connection as the hub tracks it.
struct ConnectionEntry {
    /// User this connection belongs to.
    user_id: String,
    /// Room the connection is registered in.
    room_id: Uuid,
    /// Bounded queue feeding the connection's writer.
    outbound: mpsc::Sender<OutboundFrame>,
    /// Cancels both pumps of this connection.
    cancel: CancellationToken,
}

/// The hub coordination task.
pub struct ConnectionHub {
    /// Command receiver; the sole mutation path for the maps below.
    receiver: mpsc::Receiver<HubCommand>,
    /// Subsystem cancellation token; cancelling it starts the drain.
    cancel_token: CancellationToken,
    /// Live connections by id.
    connections: HashMap<ConnectionId, ConnectionEntry>,
    /// Room occupancy index.
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
    /// Capacity of each connection's outbound queue.
    outbound_queue: usize,
    /// Bound on the drain phase of shutdown.
    drain_timeout: Duration,
}

impl ConnectionHub {
    /// Spawn the hub task. Returns a handle and the task join handle.
    pub fn spawn(
        outbound_queue: usize,
        drain_timeout: Duration,
        cancel_token: CancellationToken,
    ) -> (HubHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(HUB_CHANNEL_BUFFER);

        let hub = ConnectionHub {
            receiver,
            cancel_token: cancel_token.clone(),
            connections: HashMap::new(),
            rooms: HashMap::new(),
            outbound_queue,
            drain_timeout,
        };

        let task_handle = tokio::spawn(hub.run());

        (
            HubHandle {
                sender,
                cancel_token,
            },
            task_handle,
        )
    }

    #[instrument(skip_all, name = "rc.hub")]
    async fn run(mut self) {
        info!(target: "rc.hub", "connection hub started");

        let mut health = tokio::time::interval(HEALTH_CHECK_INTERVAL);

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    self.drain().await;
                    break;
                }

                _ = health.tick() => {
                    self.reap_dead_entries();
                }

                cmd = self.receiver.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command),
                        None => {
                            info!(target: "rc.hub", "hub channel closed, exiting");
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.hub",
            connections = self.connections.len(),
            "connection hub stopped"
        );
    }

    /// Process one command. Never awaits: command handling must not stall
    /// the loop behind any one connection or collaborator.
    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register {
                room_id,
                user_id,
                respond_to,
            } => {
                let registered = self.handle_register(room_id, user_id);
                let _ = respond_to.send(Ok(registered));
            }

            HubCommand::Deregister {
                connection_id,
                room_id,
                user_id,
                reason,
                respond_to,
            } => {
                let outcome = self.handle_deregister(connection_id, room_id, &user_id, reason, true);
                let _ = respond_to.send(outcome);
            }

            HubCommand::Broadcast { room_id, frame } => {
                let victims = self.deliver_to_room(room_id, &frame, None);
                self.drop_slow_consumers(victims);
            }

            HubCommand::SendToUser {
                room_id,
                user_id,
                frame,
            } => {
                let victims = self.deliver_to_room(room_id, &frame, Some(&user_id));
                self.drop_slow_consumers(victims);
            }

            HubCommand::CloseRoom { room_id } => {
                self.handle_close_room(room_id);
            }

            HubCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    fn handle_register(&mut self, room_id: Uuid, user_id: String) -> RegisteredConnection {
        let connection_id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_queue);
        // Deliberately not a child of the hub token: during drain the close
        // notice must reach the writer before its cancellation does. The hub
        // cancels connections one by one as it removes them.
        let cancel = CancellationToken::new();

        let first_for_user = !self.user_connected(room_id, &user_id);

        self.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.clone(),
                room_id,
                outbound: outbound_tx.clone(),
                cancel: cancel.clone(),
            },
        );
        self.rooms.entry(room_id).or_default().insert(connection_id);
        metrics::set_active_connections(self.connections.len());

        debug!(
            target: "rc.hub",
            connection_id = %connection_id,
            room_id = %room_id,
            user_id = %user_id,
            "connection registered"
        );

        if first_for_user {
            self.announce_presence(room_id, &user_id, PresenceEvent::Joined);
        }

        RegisteredConnection {
            connection_id,
            outbound: outbound_rx,
            outbound_sender: outbound_tx,
            cancel,
        }
    }

    fn handle_deregister(
        &mut self,
        connection_id: ConnectionId,
        room_id: Uuid,
        user_id: &str,
        reason: DisconnectReason,
        announce: bool,
    ) -> DeregisterOutcome {
        let removed = self.remove_entry(connection_id);
        let was_registered = removed.is_some();

        if let Some(entry) = removed {
            entry.cancel.cancel();
            metrics::record_connection_dropped(reason.as_str());
            debug!(
                target: "rc.hub",
                connection_id = %connection_id,
                room_id = %room_id,
                user_id = %user_id,
                reason = reason.as_str(),
                "connection deregistered"
            );
        }

        let last_for_user = !self.user_connected(room_id, user_id);
        if was_registered && last_for_user && announce {
            self.announce_presence(room_id, user_id, PresenceEvent::Left);
        }

        DeregisterOutcome {
            was_registered,
            last_for_user,
        }
    }

    /// Try-send `frame` to each connection in the room (optionally only one
    /// user's connections). Returns the connections whose queue was full or
    /// whose writer is gone; the caller decides their fate.
    fn deliver_to_room(
        &self,
        room_id: Uuid,
        frame: &Arc<str>,
        only_user: Option<&str>,
    ) -> Vec<ConnectionId> {
        let Some(members) = self.rooms.get(&room_id) else {
            return Vec::new();
        };

        let mut victims = Vec::new();
        let mut delivered = 0usize;

        for connection_id in members {
            let Some(entry) = self.connections.get(connection_id) else {
                continue;
            };
            if let Some(user_id) = only_user {
                if entry.user_id != user_id {
                    continue;
                }
            }
            match entry
                .outbound
                .try_send(OutboundFrame::Envelope(frame.clone()))
            {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_) | TrySendError::Closed(_)) => {
                    victims.push(*connection_id);
                }
            }
        }

        if delivered > 0 {
            metrics::record_frames_delivered(delivered);
        }
        victims
    }

    /// Drop connections that could not take a frame. Each drop may announce
    /// a presence change, which may expose further slow consumers; the set
    /// strictly shrinks, so this terminates.
    fn drop_slow_consumers(&mut self, mut victims: Vec<ConnectionId>) {
        while let Some(connection_id) = victims.pop() {
            let Some(entry) = self.remove_entry(connection_id) else {
                continue;
            };
            entry.cancel.cancel();
            metrics::record_connection_dropped(DisconnectReason::Backpressure.as_str());
            warn!(
                target: "rc.hub",
                connection_id = %connection_id,
                room_id = %entry.room_id,
                user_id = %entry.user_id,
                "dropping slow consumer"
            );

            if !self.user_connected(entry.room_id, &entry.user_id) {
                victims.extend(self.presence_frame_fanout(
                    entry.room_id,
                    &entry.user_id,
                    PresenceEvent::Left,
                ));
            }
        }
    }

    /// Queue a room-ended close notice on every connection in the room.
    /// Each writer flushes the notice and exits, and teardown comes back as
    /// ordinary deregisters; a queue that cannot even take the notice will
    /// never flush it, so that connection is cut loose on the spot.
    fn handle_close_room(&mut self, room_id: Uuid) {
        let Some(members) = self.rooms.get(&room_id) else {
            return;
        };
        info!(
            target: "rc.hub",
            room_id = %room_id,
            connections = members.len(),
            "closing connections of ended room"
        );
        for connection_id in members {
            let Some(entry) = self.connections.get(connection_id) else {
                continue;
            };
            let notice = OutboundFrame::Close {
                code: CLOSE_ROOM_ENDED,
                reason: "room ended",
            };
            if entry.outbound.try_send(notice).is_err() {
                entry.cancel.cancel();
            }
        }
    }

    fn announce_presence(&mut self, room_id: Uuid, user_id: &str, event: PresenceEvent) {
        let victims = self.presence_frame_fanout(room_id, user_id, event);
        self.drop_slow_consumers(victims);
    }

    fn presence_frame_fanout(
        &self,
        room_id: Uuid,
        user_id: &str,
        event: PresenceEvent,
    ) -> Vec<ConnectionId> {
        match Envelope::presence(&room_id.to_string(), user_id, event).encode() {
            Ok(text) => self.deliver_to_room(room_id, &Arc::from(text), None),
            Err(err) => {
                warn!(target: "rc.hub", error = %err, "presence encode failed");
                Vec::new()
            }
        }
    }

    /// Entries whose writer dropped its queue without a deregister are
    /// zombies from a torn-down task; remove them on the health tick.
    fn reap_dead_entries(&mut self) {
        let dead: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|(_, entry)| entry.outbound.is_closed())
            .map(|(id, _)| *id)
            .collect();

        for connection_id in dead {
            if let Some(entry) = self.remove_entry(connection_id) {
                entry.cancel.cancel();
                metrics::record_connection_dropped("reaped");
                warn!(
                    target: "rc.hub",
                    connection_id = %connection_id,
                    room_id = %entry.room_id,
                    user_id = %entry.user_id,
                    "reaped connection with no live writer"
                );
                if !self.user_connected(entry.room_id, &entry.user_id) {
                    self.announce_presence(entry.room_id, &entry.user_id, PresenceEvent::Left);
                }
            }
        }
    }

    /// Drain phase of shutdown: notify every connection, then keep handling
    /// deregistrations until the set empties or the deadline passes, then
    /// force-close what is left.
    async fn drain(&mut self) {
        info!(
            target: "rc.hub",
            connections = self.connections.len(),
            "hub draining"
        );

        let mut undeliverable = Vec::new();
        for (connection_id, entry) in &self.connections {
            let notice = OutboundFrame::Close {
                code: CLOSE_GOING_AWAY,
                reason: "server shutting down",
            };
            if entry.outbound.try_send(notice).is_err() {
                undeliverable.push(*connection_id);
            }
        }
        // A full queue will never flush the notice; cut those loose now.
        for connection_id in undeliverable {
            if let Some(entry) = self.connections.get(&connection_id) {
                entry.cancel.cancel();
            }
        }

        let deadline = tokio::time::Instant::now() + self.drain_timeout;
        while !self.connections.is_empty() {
            match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                Ok(Some(command)) => self.handle_command_while_draining(command),
                Ok(None) => break,
                Err(_) => break,
            }
        }

        let remaining = self.connections.len();
        if remaining > 0 {
            warn!(
                target: "rc.hub",
                remaining,
                "drain deadline passed, force-closing connections"
            );
        }
        for (_, entry) in self.connections.drain() {
            entry.cancel.cancel();
        }
        self.rooms.clear();
        metrics::set_active_connections(0);
    }

    /// During drain: registrations are refused, fan-out is dropped, and
    /// deregistrations are processed without presence noise.
    fn handle_command_while_draining(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { respond_to, .. } => {
                let _ = respond_to.send(Err(RcError::Draining));
            }
            HubCommand::Deregister {
                connection_id,
                room_id,
                user_id,
                reason,
                respond_to,
            } => {
                let outcome =
                    self.handle_deregister(connection_id, room_id, &user_id, reason, false);
                let _ = respond_to.send(outcome);
            }
            HubCommand::Broadcast { room_id, .. } => {
                debug!(target: "rc.hub", room_id = %room_id, "dropping broadcast during drain");
            }
            HubCommand::SendToUser { room_id, .. } => {
                debug!(target: "rc.hub", room_id = %room_id, "dropping send during drain");
            }
            // Drain already notified every connection.
            HubCommand::CloseRoom { room_id } => {
                debug!(target: "rc.hub", room_id = %room_id, "dropping room close during drain");
            }
            HubCommand::GetStats { respond_to } => {
                let _ = respond_to.send(self.stats());
            }
        }
    }

    fn remove_entry(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let entry = self.connections.remove(&connection_id)?;
        if let Some(members) = self.rooms.get_mut(&entry.room_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.rooms.remove(&entry.room_id);
            }
        }
        metrics::set_active_connections(self.connections.len());
        Some(entry)
    }

    fn user_connected(&self, room_id: Uuid, user_id: &str) -> bool {
        self.rooms.get(&room_id).is_some_and(|members| {
            members.iter().any(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|entry| entry.user_id == user_id)
            })
        })
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            rooms: self.rooms.len(),
        }
    }
}
