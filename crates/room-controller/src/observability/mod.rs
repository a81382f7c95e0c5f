//! Observability module for the Room Controller.
//!
//! Metric labels are bounded to prevent cardinality explosion; room IDs and
//! user IDs never appear as labels, only as structured tracing fields.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `rc_rooms_active` | Gauge | none | Rooms in the active set |
//! | `rc_rooms_created_total` | Counter | none | Room creations |
//! | `rc_rooms_ended_total` | Counter | `reason` | Terminal room transitions |
//! | `rc_connections_active` | Gauge | none | Live hub connections |
//! | `rc_connections_dropped_total` | Counter | `reason` | Connection teardown causes |
//! | `rc_frames_delivered_total` | Counter | none | Frames enqueued by fan-out |
//! | `rc_signaling_sessions_active` | Gauge | none | Non-closed signaling sessions |
//! | `rc_signaling_sessions_closed_total` | Counter | `reason` | Session closes |
//! | `rc_chat_messages_total` | Counter | none | Chat messages fanned out |
//! | `rc_http_requests_total` | Counter | `method`, `endpoint`, `status_code` | REST traffic |
//! | `rc_http_request_duration_seconds` | Histogram | `method`, `endpoint`, `status` | REST latency |

pub mod health;
pub mod metrics;

// Re-exports for convenience
pub use health::HealthState;
pub use metrics::{init_metrics_recorder, record_http_request};
