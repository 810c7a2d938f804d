//! HTTP API server with observability for the transaction coordinator.
//!
//! Provides read-only REST endpoints over the transaction log,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use coordinator::{CallbackRegistry, ChannelDispatcher, TransactionRouter};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use txlog::TxLogStore;

use routes::transactions::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/transactions", get(routes::transactions::list))
        .route("/transactions/stats", get(routes::transactions::stats))
        .route("/transactions/slowest", get(routes::transactions::slowest))
        .route("/transactions/{id}", get(routes::transactions::get))
        .route("/transactions/{id}/events", get(routes::transactions::events))
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

/// Wires the coordinator stack over a log store and returns the shared
/// application state.
pub fn create_default_state(
    log: Arc<dyn TxLogStore>,
    default_retry_budget: i32,
    retry_delay: Duration,
) -> Arc<AppState> {
    let registry = CallbackRegistry::new();
    let dispatcher = Arc::new(ChannelDispatcher::new(
        registry.clone(),
        Arc::clone(&log),
        retry_delay,
    ));
    let router = TransactionRouter::new(Arc::clone(&log), dispatcher, default_retry_budget);

    Arc::new(AppState {
        log,
        router,
        registry,
        default_retry_budget,
    })
}
