//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers descriptions for the metrics the fulfillment core records.
pub fn describe() {
    metrics::describe_counter!(
        "order_transitions_total",
        "Order state transitions committed, by target state"
    );
    metrics::describe_counter!(
        "order_transition_failures_total",
        "Order state transitions rejected, by target state and error kind"
    );
    metrics::describe_counter!(
        "low_stock_advisories_total",
        "Sales that left a product at or below its reorder threshold"
    );
    metrics::describe_histogram!(
        "order_transition_duration_seconds",
        Unit::Seconds,
        "Time spent applying an order state transition"
    );
}

/// GET /metrics — returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}
