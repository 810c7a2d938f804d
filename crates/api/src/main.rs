//! Coordinator service entry point.

use std::sync::Arc;

use coordinator::{AlwaysLeader, CoordinatorConfig, TimeoutScanner};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use txlog::{InMemoryTxLogStore, PostgresTxLogStore, TxLogStore};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    let config = api::config::Config::from_env();
    let coordinator_config = CoordinatorConfig::from_env();

    // 3. Create the transaction log store
    let log: Arc<dyn TxLogStore> = match &config.database_url {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await
                .expect("failed to connect to database");
            let store = PostgresTxLogStore::new(pool);
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            tracing::info!("using PostgreSQL transaction log");
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory transaction log");
            Arc::new(InMemoryTxLogStore::new())
        }
    };

    // 4. Wire registry, dispatcher, and router
    let state = api::create_default_state(
        Arc::clone(&log),
        coordinator_config.default_retry_budget,
        coordinator_config.retry_delay,
    );

    // 5. Recover in-flight transactions from the log
    let recovered = state.router.recover().await.expect("recovery failed");
    tracing::info!(recovered, "crash recovery complete");

    // 6. Start the timeout scanner
    let scanner = TimeoutScanner::new(
        Arc::clone(&log),
        state.router.clone(),
        Arc::new(AlwaysLeader),
        coordinator_config.timeout_scan_interval,
    );
    let scanner_handle = scanner.start();

    // 7. Build the application and serve
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting coordinator API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    scanner_handle.abort();
    tracing::info!("server shut down gracefully");
}
