//! HTTP API server with observability for the fulfillment core.
//!
//! Provides REST endpoints for orders, line edits and state transitions,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use domain::{AdvisoryBus, FulfillmentService, InMemoryCatalog, InMemoryUserDirectory};
use metrics_exporter_prometheus::PrometheusHandle;
use storage::{InMemoryStore, Store};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: Store + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/users", post(routes::users::register::<S>))
        .route("/products", post(routes::products::create::<S>))
        .route("/products/{id}/stock", get(routes::products::stock::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/lines", post(routes::orders::add_line::<S>))
        .route(
            "/orders/{id}/lines/{product_id}",
            delete(routes::orders::remove_line::<S>),
        )
        .route(
            "/orders/{id}/transition",
            post(routes::orders::transition::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the default application state: an in-memory store with empty
/// in-memory catalog and user directory.
pub fn create_default_state(config: &Config) -> Arc<AppState<InMemoryStore>> {
    let store = InMemoryStore::new().with_lock_timeout(config.lock_timeout);
    let service = FulfillmentService::new(
        store,
        InMemoryCatalog::new(),
        InMemoryUserDirectory::new(),
    )
    .with_advisory_bus(AdvisoryBus::new(config.advisory_buffer));

    Arc::new(AppState { service })
}
