//! Metric recorders for the Room Controller.
//!
//! Naming follows Prometheus conventions: `rc_` prefix, `_total` for
//! counters, `_seconds` for duration histograms. Every label set here is
//! bounded: endpoints are normalized to route templates and reasons come
//! from closed enums, so no room ID, user ID, or other unbounded value ever
//! becomes a label. Those belong in tracing fields.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Latency buckets for the HTTP histogram. Room operations are memory-bound
/// and the store is the only slow path, so the range is dense under 500ms
/// with a short tail.
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.150, 0.200, 0.300, 0.500, 1.000, 2.000,
];

/// Install the global Prometheus recorder and return the handle the
/// `/metrics` handler renders from. Call once at startup, before anything
/// records; a second install attempt fails.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("rc_http_request".to_string()),
            HTTP_LATENCY_BUCKETS,
        )
        .and_then(PrometheusBuilder::install_recorder)
        .map_err(|err| format!("prometheus recorder install failed: {err}"))
}

// ============================================================================
// HTTP
// ============================================================================

/// Record one finished HTTP exchange.
///
/// Metrics: `rc_http_requests_total` (labels `method`, `endpoint`,
/// `status_code`) and `rc_http_request_duration_seconds` (labels `method`,
/// `endpoint`, `status`). Fed by the outermost middleware, so synthesized
/// framework responses (404, 405, 415) are counted too.
pub fn record_http_request(method: &str, endpoint: &str, status_code: u16, duration: Duration) {
    let endpoint = normalize_endpoint(endpoint);

    histogram!("rc_http_request_duration_seconds",
        "method" => method.to_string(),
        "endpoint" => endpoint.clone(),
        "status" => status_bucket(status_code).to_string()
    )
    .record(duration.as_secs_f64());

    counter!("rc_http_requests_total",
        "method" => method.to_string(),
        "endpoint" => endpoint,
        "status_code" => status_code.to_string()
    )
    .increment(1);
}

/// Coarse status label for latency queries: `success`, `timeout`, `error`.
fn status_bucket(status_code: u16) -> &'static str {
    match status_code {
        200..=299 => "success",
        408 | 504 => "timeout",
        _ => "error",
    }
}

/// Collapse a request path onto its route template. Anything that is not a
/// known route becomes `/other`, so unknown-path scans cannot mint labels.
fn normalize_endpoint(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let template = match segments.as_slice() {
        [] => "/",
        ["health"] => "/health",
        ["ready"] => "/ready",
        ["metrics"] => "/metrics",
        ["api", "rooms"] => "/api/rooms",
        ["api", "rooms", _] => "/api/rooms/{id}",
        ["api", "rooms", _, "join"] => "/api/rooms/{id}/join",
        ["api", "rooms", _, "leave"] => "/api/rooms/{id}/leave",
        ["api", "rooms", _, "end"] => "/api/rooms/{id}/end",
        ["api", "ws", "rooms", _] => "/api/ws/rooms/{id}",
        _ => "/other",
    };
    template.to_string()
}

// ============================================================================
// Rooms, connections, signaling, chat
// ============================================================================

fn set_gauge(name: &'static str, count: usize) {
    // Counts stay far below 2^53, where the f64 conversion starts losing.
    #[allow(clippy::cast_precision_loss)]
    gauge!(name).set(count as f64);
}

/// `rc_rooms_active` gauge: rooms in the active set. Updated by the
/// registry on every active-set mutation.
pub fn set_active_rooms(count: usize) {
    set_gauge("rc_rooms_active", count);
}

/// `rc_rooms_created_total` counter.
pub fn record_room_created() {
    counter!("rc_rooms_created_total").increment(1);
}

/// `rc_rooms_ended_total` counter, `reason` one of `explicit`, `expired`,
/// `auto_delete`.
pub fn record_room_ended(reason: &'static str) {
    counter!("rc_rooms_ended_total", "reason" => reason).increment(1);
}

/// `rc_connections_active` gauge: connections registered with the hub.
pub fn set_active_connections(count: usize) {
    set_gauge("rc_connections_active", count);
}

/// `rc_connections_dropped_total` counter. `reason` is a disconnect cause
/// (`peer_closed`, `idle_timeout`, `write_failed`, `malformed`, `oversized`,
/// `transport_error`, `backpressure`, `cancelled`) or `reaped` when the
/// health check removed a dead entry. A sustained `backpressure` rate means
/// clients are not keeping up with room fan-out and the outbound queue
/// capacity needs review.
pub fn record_connection_dropped(reason: &str) {
    counter!("rc_connections_dropped_total", "reason" => reason.to_string()).increment(1);
}

/// `rc_frames_delivered_total` counter: frames placed on per-connection
/// outbound queues by one fan-out. Counts enqueues, not transport writes; a
/// frame can still be lost if its connection dies before the writer drains.
pub fn record_frames_delivered(count: usize) {
    counter!("rc_frames_delivered_total").increment(count as u64);
}

/// `rc_signaling_sessions_active` gauge: sessions not yet closed.
pub fn set_signaling_sessions(count: usize) {
    set_gauge("rc_signaling_sessions_active", count);
}

/// `rc_signaling_sessions_closed_total` counter, `reason` either `explicit`
/// (client asked) or `teardown` (connection went away).
pub fn record_session_closed(reason: &'static str) {
    counter!("rc_signaling_sessions_closed_total", "reason" => reason).increment(1);
}

/// `rc_chat_messages_total` counter: chat frames accepted for fan-out.
pub fn record_chat_message() {
    counter!("rc_chat_messages_total").increment(1);
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bucket_boundaries() {
        for (code, want) in [
            (200, "success"),
            (204, "success"),
            (299, "success"),
            (400, "error"),
            (404, "error"),
            (408, "timeout"),
            (500, "error"),
            (504, "timeout"),
        ] {
            assert_eq!(status_bucket(code), want, "status {code}");
        }
    }

    #[test]
    fn test_normalize_endpoint_templates() {
        let id = "0d38dd6a-43ab-4c05-bfb2-c867052c2d55";
        for (raw, want) in [
            ("/".to_string(), "/"),
            ("/health".to_string(), "/health"),
            ("/ready".to_string(), "/ready"),
            ("/metrics".to_string(), "/metrics"),
            ("/api/rooms".to_string(), "/api/rooms"),
            (format!("/api/rooms/{id}"), "/api/rooms/{id}"),
            (format!("/api/rooms/{id}/join"), "/api/rooms/{id}/join"),
            (format!("/api/rooms/{id}/leave"), "/api/rooms/{id}/leave"),
            (format!("/api/rooms/{id}/end"), "/api/rooms/{id}/end"),
            (format!("/api/ws/rooms/{id}"), "/api/ws/rooms/{id}"),
        ] {
            assert_eq!(normalize_endpoint(&raw), want, "path {raw}");
        }
    }

    #[test]
    fn test_normalize_endpoint_bounds_unknown_paths() {
        for raw in [
            "/admin/debug",
            "/api",
            "/api/rooms/a/b/c/d",
            "/api/rooms/abc/freeze",
            "/api/ws/rooms",
        ] {
            assert_eq!(normalize_endpoint(raw), "/other", "path {raw}");
        }
    }

    // Recording helpers run against whatever global recorder is installed
    // (no-op by default); exercising them catches label typos that would
    // otherwise only surface at scrape time.
    #[test]
    fn test_recording_helpers_accept_all_reasons() {
        set_active_rooms(3);
        record_room_created();
        for reason in ["explicit", "expired", "auto_delete"] {
            record_room_ended(reason);
        }
        set_active_connections(40);
        for reason in [
            "peer_closed",
            "idle_timeout",
            "write_failed",
            "malformed",
            "oversized",
            "transport_error",
            "backpressure",
            "cancelled",
            "reaped",
        ] {
            record_connection_dropped(reason);
        }
        record_frames_delivered(11);
        set_signaling_sessions(2);
        record_session_closed("explicit");
        record_session_closed("teardown");
        record_chat_message();
        record_http_request("GET", "/api/rooms", 200, Duration::from_millis(12));
    }

    #[test]
    fn test_snapshot_captures_recorded_names() {
        use metrics_util::debugging::DebuggingRecorder;

        // Global recorder: this is the only test in the binary that installs
        // one; concurrent tests recording into it only add entries, which
        // the contains-checks tolerate.
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let _ = recorder.install();

        set_active_rooms(4);
        record_room_created();
        record_connection_dropped("backpressure");
        record_http_request("GET", "/health", 200, Duration::from_millis(1));

        let names: Vec<String> = snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .map(|(key, _, _, _)| key.key().name().to_string())
            .collect();

        for expected in [
            "rc_rooms_active",
            "rc_rooms_created_total",
            "rc_connections_dropped_total",
            "rc_http_requests_total",
            "rc_http_request_duration_seconds",
        ] {
            assert!(
                names.iter().any(|name| name == expected),
                "missing {expected} in {names:?}"
            );
        }
    }
}
