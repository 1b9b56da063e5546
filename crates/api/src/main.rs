//! API server entry point.

use std::sync::Arc;

use api::{Config, LogFormat, Stores};
use message_store::{InMemoryBroker, PostgresMessageStore};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
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

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_stores(config: &Config) -> Result<Stores, Box<dyn std::error::Error>> {
    let Some(url) = config.database_url.as_deref() else {
        tracing::info!("DATABASE_URL not set, using in-memory stores");
        return Ok(Stores::in_memory());
    };

    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    let store = PostgresMessageStore::new(pool);
    store.run_migrations().await?;
    tracing::info!("connected to PostgreSQL and applied migrations");
    Ok(Stores::postgres(store))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Configuration and tracing
    let config = Config::from_env()?;
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Stores, broker and application state
    let stores = open_stores(&config).await?;
    let broker = Arc::new(InMemoryBroker::new());
    let runtime = api::build_runtime(&config, stores, broker).await;

    // 4. Background tasks
    let shutdown = CancellationToken::new();
    let relay = runtime.relay;
    let relay_interval = config.outbox_relay_interval;
    let relay_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { relay.run(relay_interval, shutdown).await }
    });
    let worker = runtime.worker;
    let worker_task = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { worker.run(shutdown).await }
    });

    // 5. Serve until a shutdown signal arrives
    let app = api::create_app(runtime.state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting API server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 6. Stop background tasks
    shutdown.cancel();
    let (relay_result, worker_result) = tokio::join!(relay_task, worker_task);
    for result in [relay_result, worker_result] {
        if let Err(err) = result {
            tracing::error!(error = %err, "background task ended abnormally");
        }
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}
