//! Transport seam between the hub and the wire.
//!
//! The hub needs an ordered duplex text channel with explicit close, nothing
//! more. Read and write deadlines are the caller's job (`tokio::time::timeout`
//! around `next_frame` / `send_text`); the adapters enforce only the maximum
//! inbound message size.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::borrow::Cow;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("inbound message exceeds {limit} bytes")]
    TooLarge { limit: usize },
    #[error("transport protocol violation: {0}")]
    Protocol(String),
    #[error("transport failed: {0}")]
    Io(String),
}

/// Inbound half of a connection. `Ok(None)` is a clean close from the peer.
/// `Sync` is part of the contract: the pumps hold these as trait objects
/// inside spawned futures.
#[async_trait]
pub trait TransportReader: Send + Sync {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError>;
}

/// Outbound half of a connection.
#[async_trait]
pub trait TransportWriter: Send + Sync {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError>;

    /// Send a close frame with `code` and `reason`, then shut the channel.
    /// Best effort: the peer may already be gone.
    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError>;
}

/// A duplex channel the hub can split into independently-owned halves, one
/// for the reader task and one for the writer task.
pub trait Transport: Send {
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>);
}

/// WebSocket-backed transport.
pub struct WsTransport {
    socket: WebSocket,
    max_message_bytes: usize,
}

impl WsTransport {
    pub fn new(socket: WebSocket, max_message_bytes: usize) -> Self {
        WsTransport {
            socket,
            max_message_bytes,
        }
    }
}

impl Transport for WsTransport {
    fn into_split(self: Box<Self>) -> (Box<dyn TransportReader>, Box<dyn TransportWriter>) {
        let (sink, stream) = self.socket.split();
        (
            Box::new(WsReader {
                stream,
                max_message_bytes: self.max_message_bytes,
            }),
            Box::new(WsWriter { sink }),
        )
    }
}

struct WsReader {
    stream: SplitStream<WebSocket>,
    max_message_bytes: usize,
}

#[async_trait]
impl TransportReader for WsReader {
    async fn next_frame(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                None => return Ok(None),
                Some(Err(err)) => return Err(TransportError::Io(err.to_string())),
                Some(Ok(Message::Text(text))) => {
                    if text.len() > self.max_message_bytes {
                        return Err(TransportError::TooLarge {
                            limit: self.max_message_bytes,
                        });
                    }
                    return Ok(Some(text));
                }
                Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Binary(_))) => {
                    return Err(TransportError::Protocol(
                        "binary frames are not supported".to_string(),
                    ));
                }
                // Protocol-level ping/pong is handled underneath; liveness
                // uses envelope ping/pong.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            }
        }
    }
}

struct WsWriter {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl TransportWriter for WsWriter {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code,
            reason: Cow::Owned(reason.to_string()),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|err| TransportError::Io(err.to_string()))?;
        // Ignore errors on the final shutdown; the close frame is out.
        let _ = self.sink.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_halves_are_spawn_safe() {
        fn assert_send_sync<T: Send + Sync + ?Sized>() {}
        assert_send_sync::<dyn TransportReader>();
        assert_send_sync::<dyn TransportWriter>();
    }
}
