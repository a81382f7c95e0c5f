//! # RC Test Utilities
//!
//! Test doubles and fixtures for exercising the Room Controller (RC)
//! without Postgres or a live WebSocket peer.
//!
//! ## Modules
//!
//! - `memory_store` - In-memory `RoomStore` with call counting and failure injection
//! - `mock_media` - Mock media endpoint for signaling tests
//! - `mock_policy` - Scriptable access policy
//! - `channel_transport` - In-memory transport pair standing in for a WebSocket
//! - `fixtures` - Pre-configured test data (room specs, liveness settings)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test]
//! async fn join_survives_a_flaky_store() {
//!     // Store that fails the next participant insert, then recovers.
//!     let store = MemoryRoomStore::new();
//!     store.inject_failure(StoreOp::InsertParticipant);
//!
//!     // Server half goes to the connection loop, client half stays here.
//!     let (transport, mut client) = ChannelTransport::pair();
//! }
//! ```

pub mod channel_transport;
pub mod fixtures;
pub mod memory_store;
pub mod mock_media;
pub mod mock_policy;

pub use channel_transport::*;
pub use fixtures::*;
pub use memory_store::*;
pub use mock_media::*;
pub use mock_policy::*;
