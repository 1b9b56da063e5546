//! Prometheus scrape endpoint.
//!
//! Exposes the command pipeline counters and latency histogram, event
//! publish and outbox relay counters, consumer retry and dead-letter
//! counters, and the store commit histogram recorded across the workspace.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;

const PROMETHEUS_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// GET /metrics
pub async fn get(State(recorder): State<PrometheusHandle>) -> impl IntoResponse {
    ([(CONTENT_TYPE, PROMETHEUS_TEXT)], recorder.render())
}
