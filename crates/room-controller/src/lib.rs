//! Room Controller (RC) Service Library
//!
//! This library provides the core functionality for the Hearth
//! Room Controller - a stateful WebSocket coordination server responsible for:
//!
//! - Live audio room lifecycle (create, join, leave, end)
//! - Real-time fan-out of room events and chat to connected listeners
//! - Media signaling relay between participants and the audio mixer
//! - Temporary-room expiry sweeping
//!
//! # Architecture
//!
//! All live connection state is owned by a single hub task:
//!
//! ```text
//! ConnectionHub (singleton task, owns connection and room maps)
//! ├── fans frames out to N connection sessions
//! │   └── run_connection (one per WebSocket)
//! │       ├── reader half: inbound frames -> registry / relay / hub
//! │       └── writer half: bounded outbound queue -> socket
//! ├── RoomRegistry (room lifecycle + roster, persisted to Postgres)
//! └── SignalingRelay (per-user media negotiation sessions)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single-writer hub**: Every mutation of the connection maps happens on
//!   the hub task, so fan-out never contends on locks
//! - **Slow consumers are dropped**: Outbound queues are bounded and a full
//!   queue disconnects that consumer instead of stalling the room
//! - **Registry is authoritative for admission**: Postgres persists rooms and
//!   participation history, the in-memory active set decides joins
//! - **One connection per (room, user)**: A user in multiple rooms has
//!   multiple connections
//!
//! # Modules
//!
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status and close-code mapping
//! - `handlers` - HTTP and WebSocket upgrade handlers
//! - `hub` - Connection hub task and per-connection session loop
//! - `middleware` - HTTP metrics middleware
//! - `models` - Request and response DTOs
//! - `observability` - Health state and Prometheus metrics
//! - `policy` - Access policy seam for private rooms
//! - `protocol` - WebSocket envelope wire format
//! - `registry` - Room lifecycle and roster
//! - `routes` - Axum router setup
//! - `signaling` - Media negotiation relay
//! - `storage` - Postgres persistence
//! - `tasks` - Background tasks (expiry sweeper)
//! - `transport` - WebSocket framing abstraction

pub mod config;
pub mod errors;
pub mod handlers;
pub mod hub;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod routes;
pub mod signaling;
pub mod storage;
pub mod tasks;
pub mod transport;
