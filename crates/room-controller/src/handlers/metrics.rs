//! Prometheus metrics endpoint handler.

use axum::extract::State;
use metrics_exporter_prometheus::PrometheusHandle;

/// Handler for GET /metrics
///
/// Renders all registered metrics in Prometheus text exposition format.
/// The handle is installed once at startup by `init_metrics_recorder`.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
