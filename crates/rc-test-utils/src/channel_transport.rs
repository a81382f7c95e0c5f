//! In-process transport backed by channels, plus the test client that holds
//! the other end.
//!
//! Lets connection-lifecycle tests run the real reader and writer pumps
//! without a socket. The server-to-client side is a bounded channel, so a
//! client that stops consuming stalls writes exactly like a slow WebSocket
//! peer; the capacity is adjustable to make that stall cheap to reach.
//!
//! # Example
//!
//! ```rust,ignore
//! use rc_test_utils::{ChannelTransport, ClientEvent};
//!
//! let (transport, mut client) = ChannelTransport::pair();
//! tokio::spawn(run_connection(deps, Box::new(transport), room_id, user));
//!
//! client.send_json(&serde_json::json!({"type": "ping"}));
//! let pong = client.recv_frame().await;
//! ```

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use room_controller::transport::{Transport, TransportError, TransportReader, TransportWriter};

const DEFAULT_OUTBOUND_CAPACITY: usize = 32;
const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;

/// What the test client observed from the server, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A text frame.
    Frame(String),
    /// A close frame. Nothing follows it.
    Closed { code: u16, reason: String },
}

/// Builder for a transport/client pair with non-default limits.
#[derive(Debug, Clone)]
pub struct ChannelTransportBuilder {
    outbound_capacity: usize,
    max_message_bytes: usize,
}

impl Default for ChannelTransportBuilder {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

impl ChannelTransportBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity of the server-to-client channel. A full channel blocks the
    /// writer, so a small value here makes a stalled-consumer scenario reach
    /// the stall quickly.
    #[must_use]
    pub fn with_outbound_capacity(mut self, capacity: usize) -> Self {
        self.outbound_capacity = capacity;
        self
    }

    /// Largest inbound frame the reader accepts.
    #[must_use]
    pub fn with_max_message_bytes(mut self, bytes: usize) -> Self {
        self.max_message_bytes = bytes;
        self
    }

    #[must_use]
    pub fn pair(self) -> (ChannelTransport, TestClient) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, events) = mpsc::channel(self.outbound_capacity);
        (
            ChannelTransport {
                to_client,
                from_client,
                max_message_bytes: self.max_message_bytes,
            },
            TestClient {
                to_server: Some(to_server),
                events,
            },
        )
    }
}

/// Channel-backed implementation of `Transport`.
pub struct ChannelTransport {
    to_client: mpsc::Sender<ClientEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    max_message_bytes: usize,
}

impl ChannelTransport {
    /// A transport/client pair with default limits.
    #[must_use]
    pub fn pair() -> (ChannelTransport, TestClient) {
        ChannelTransportBuilder::new().pair()
    }
}

impl Transport for ChannelTransport {
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        (
            Box::new(ChannelReader {
                from_client: self.from_client,
                max_message_bytes: self.max_message_bytes,
            }),
            Box::new(ChannelWriter {
                to_client: self.to_client,
            }),
        )
    }
}

struct ChannelReader {
    from_client: mpsc::UnboundedReceiver<String>,
    max_message_bytes: usize,
}

#[async_trait]
impl TransportReader for ChannelReader {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        match self.from_client.recv().await {
            None => Ok(None),
            Some(text) => {
                if text.len() > self.max_message_bytes {
                    return Err(TransportError::TooLarge {
                        limit: self.max_message_bytes,
                    });
                }
                Ok(Some(text))
            }
        }
    }
}

struct ChannelWriter {
    to_client: mpsc::Sender<ClientEvent>,
}

#[async_trait]
impl TransportWriter for ChannelWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.to_client
            .send(ClientEvent::Frame(text.to_string()))
            .await
            .map_err(|_| TransportError::Io("test client stopped reading".to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        self.to_client
            .send(ClientEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await
            .map_err(|_| TransportError::Io("test client stopped reading".to_string()))
    }
}

/// The peer end of a `ChannelTransport`.
#[derive(Debug)]
pub struct TestClient {
    to_server: Option<mpsc::UnboundedSender<String>>,
    events: mpsc::Receiver<ClientEvent>,
}

impl TestClient {
    /// Send one text frame to the server.
    ///
    /// # Panics
    ///
    /// Panics after `close`, or if the server side is already gone.
    pub fn send_frame(&self, text: impl Into<String>) {
        self.to_server
            .as_ref()
            .expect("client already closed")
            .send(text.into())
            .expect("server reader is gone");
    }

    /// Send one JSON value as a text frame.
    pub fn send_json(&self, value: &Value) {
        self.send_frame(value.to_string());
    }

    /// Close the client-to-server direction. The server reader sees a clean
    /// close; events already in flight can still be received.
    pub fn close(&mut self) {
        self.to_server = None;
    }

    /// Refuse all further server writes. Buffered events remain receivable;
    /// the server's next write fails instead of blocking.
    pub fn stop_reading(&mut self) {
        self.events.close();
    }

    /// Next event from the server, `None` once the server writer is gone.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Next event, which must be a text frame, parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics on a close frame, a disconnected server, or non-JSON text.
    pub async fn recv_frame(&mut self) -> Value {
        match self.events.recv().await {
            Some(ClientEvent::Frame(text)) => {
                serde_json::from_str(&text).expect("frame is not valid JSON")
            }
            Some(ClientEvent::Closed { code, reason }) => {
                panic!("expected frame, connection closed with {code} {reason:?}")
            }
            None => panic!("expected frame, server writer is gone"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (transport, mut client) = ChannelTransport::pair();
        let (mut reader, mut writer) = Box::new(transport).into_split();

        client.send_frame("hello");
        assert_eq!(reader.next_frame().await.unwrap(), Some("hello".to_string()));

        writer.send_text("world").await.unwrap();
        assert_eq!(
            client.recv().await,
            Some(ClientEvent::Frame("world".to_string()))
        );
    }

    #[tokio::test]
    async fn test_client_close_is_a_clean_read_end() {
        let (transport, mut client) = ChannelTransport::pair();
        let (mut reader, _writer) = Box::new(transport).into_split();

        client.send_frame("last words");
        client.close();

        assert_eq!(
            reader.next_frame().await.unwrap(),
            Some("last words".to_string())
        );
        assert_eq!(reader.next_frame().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_inbound_frame_is_rejected() {
        let (transport, client) = ChannelTransportBuilder::new()
            .with_max_message_bytes(8)
            .pair();
        let (mut reader, _writer) = Box::new(transport).into_split();

        client.send_frame("way past the configured limit");
        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(err, TransportError::TooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_stop_reading_fails_writes() {
        let (transport, mut client) = ChannelTransport::pair();
        let (_reader, mut writer) = Box::new(transport).into_split();

        writer.send_text("buffered").await.unwrap();
        client.stop_reading();

        let err = writer.send_text("refused").await.unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));

        // The frame accepted before the stop is still there.
        assert_eq!(
            client.recv().await,
            Some(ClientEvent::Frame("buffered".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_outbound_channel_blocks_the_writer() {
        let (transport, client) = ChannelTransportBuilder::new()
            .with_outbound_capacity(1)
            .pair();
        let (_reader, mut writer) = Box::new(transport).into_split();

        writer.send_text("fills the channel").await.unwrap();

        // Client holds the receiver but is not consuming: the next write
        // must park rather than fail.
        let stalled =
            tokio::time::timeout(Duration::from_secs(1), writer.send_text("parked")).await;
        assert!(stalled.is_err());
        drop(client);
    }

    #[tokio::test]
    async fn test_close_frame_reaches_the_client() {
        let (transport, mut client) = ChannelTransport::pair();
        let (_reader, mut writer) = Box::new(transport).into_split();

        writer.close(1000, "done").await.unwrap();
        assert_eq!(
            client.recv().await,
            Some(ClientEvent::Closed {
                code: 1000,
                reason: "done".to_string()
            })
        );
    }
}
