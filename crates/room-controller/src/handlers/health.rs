//! Probe endpoints.
//!
//! `/health` answers whenever the process can still schedule a handler and
//! checks nothing else; a failure there means the process is wedged and the
//! orchestrator should restart it. `/ready` is the routing gate: it reports
//! 503 once shutdown has begun or when the durable store stops answering,
//! which pulls the instance from the load balancer before clients notice.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;

use crate::models::ReadinessResponse;
use crate::routes::AppState;

/// Liveness probe. No dependency checks by design.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe. Two gates, cheapest first:
///
/// 1. the shutdown flag, flipped at the start of drain before any connection
///    is closed, so new traffic stops arriving while existing rooms wind down;
/// 2. a store ping, since a controller that cannot reach Postgres can serve
///    neither the room API nor new joins.
///
/// The response body stays generic; whatever actually failed goes to the
/// server log only.
#[tracing::instrument(skip_all, name = "rc.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if !state.health.is_ready() {
        return not_ready(None);
    }

    if let Err(err) = state.store.ping().await {
        tracing::warn!(target: "rc.health", error = %err, "readiness probe: store ping failed");
        return not_ready(Some("unhealthy"));
    }

    (
        StatusCode::OK,
        Json(ReadinessResponse {
            status: "ready",
            database: Some("healthy"),
            error: None,
        }),
    )
}

fn not_ready(database: Option<&'static str>) -> (StatusCode, Json<ReadinessResponse>) {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ReadinessResponse {
            status: "not_ready",
            database,
            error: Some("not accepting traffic".to_string()),
        }),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness_answers_without_dependencies() {
        assert_eq!(health_check().await, "OK");
    }

    #[test]
    fn test_not_ready_body_shape() {
        let (status, Json(body)) = not_ready(None);
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "not_ready");
        assert!(body.database.is_none());

        let (_, Json(body)) = not_ready(Some("unhealthy"));
        assert_eq!(body.database, Some("unhealthy"));
    }

    // The full readiness flow (drain flag short-circuit, store outage) runs
    // against the assembled router in tests/rest_api.rs.
}
