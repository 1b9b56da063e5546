//! HTTP API server for carts and the catalog.
//!
//! Commands go through the pipeline, commit through a unit of work and
//! publish their events to the broker; the cart-summary consumer builds a
//! read model from them. Dead letters can be listed and replayed. Every
//! request is traced, and Prometheus metrics are served on `/metrics`.

pub mod config;
pub mod context;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::{Config, ConfigError, LogFormat};
pub use state::{AppState, Runtime, Stores, build_runtime};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/carts", post(routes::carts::create))
        .route("/carts/{id}", get(routes::carts::get))
        .route("/carts/{id}/items", post(routes::carts::add_item))
        .route(
            "/carts/{id}/items/{product_id}",
            put(routes::carts::change_quantity).delete(routes::carts::remove_item),
        )
        .route("/carts/{id}/checkout", post(routes::carts::checkout))
        .route("/products", post(routes::products::create))
        .route("/products/{id}", get(routes::products::get))
        .route("/products/{id}/price", put(routes::products::change_price))
        .route(
            "/products/{id}/discontinue",
            post(routes::products::discontinue),
        )
        .route("/cart-summaries/{id}", get(routes::cart_summaries::get))
        .route("/dead-letters/{queue}", get(routes::dead_letters::list))
        .route(
            "/dead-letters/{queue}/{sequence}/retry",
            post(routes::dead_letters::retry),
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
