//! HTTP request handlers for the Room Controller.

pub mod health;
pub mod metrics;
pub mod rooms;
pub mod ws;

pub use health::{health_check, readiness_check};
pub use metrics::metrics_handler;
pub use rooms::{create_room, end_room, get_room, join_room, leave_room, list_rooms};
pub use ws::ws_connect;
