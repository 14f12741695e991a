//! Beacon Server
//!
//! HTTP surface for student risk scoring, alerting, interventions and
//! cohort trends. Also hosts the background tasks: notification delivery,
//! scheduled-notification release and the trend worker.

#![warn(missing_docs)]

pub mod config;
pub mod handlers;

use beacon_domain::{Clock, RiskStore, SystemClock};
use beacon_engine::{delivery_channel, run_delivery, DeliveryQueue, LogSink, RiskService};
use beacon_store::{SqliteStore, StoreError};
use beacon_trends::{TrendAggregator, TrendWorker};
use config::ServerConfig;
use handlers::{create_router, AppState};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Server error
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Store could not be opened or closed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Server binding error
    #[error("Failed to bind server: {0}")]
    Bind(#[from] std::io::Error),

    /// Server error
    #[error("Server error: {0}")]
    Server(String),
}

/// Build the shared handler state over `store`
pub fn build_state(
    config: &ServerConfig,
    store: Arc<dyn RiskStore>,
    queue: DeliveryQueue,
    clock: Arc<dyn Clock>,
) -> AppState {
    let service = Arc::new(RiskService::new(
        Arc::clone(&store),
        config.engine_config(),
        config.notifications.recipients.clone(),
        queue,
        Arc::clone(&clock),
    ));
    let trends = Arc::new(TrendAggregator::new(
        store,
        Arc::clone(service.scoring()),
        Arc::clone(service.interventions()),
        clock,
        config.trends.period,
    ));
    AppState { service, trends }
}

/// Install the global tracing subscriber (`RUST_LOG`, default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_err() {
        warn!("Tracing subscriber already installed");
    }
}

/// Start the Beacon HTTP server
///
/// Opens the store, starts the background tasks and serves until Ctrl+C.
/// On shutdown the background tasks are stopped, the delivery queue is
/// drained and the store is closed.
pub async fn start_server(config: ServerConfig) -> Result<(), ServerError> {
    init_tracing();

    info!("Starting Beacon server");
    info!("Bind address: {}", config.bind_addr());
    info!("Database: {}", config.database_path.display());
    info!(
        "Notification recipients: {}",
        config.notifications.recipients.len()
    );

    let sqlite = Arc::new(SqliteStore::open(&config.database_path)?);
    let store: Arc<dyn RiskStore> = sqlite.clone();
    let (queue, rx) = delivery_channel();
    let state = build_state(&config, store, queue, Arc::new(SystemClock));
    let listener = TcpListener::bind(&config.bind_addr()).await?;

    let shutdown = CancellationToken::new();
    let delivery = tokio::spawn(run_delivery(rx, Arc::new(LogSink)));
    let release = tokio::spawn(release_scheduled(
        Arc::clone(&state.service),
        config.release_interval(),
        shutdown.clone(),
    ));
    let trends = if config.trends.enabled {
        let mut worker = TrendWorker::new(Arc::clone(&state.trends), config.trends.clone());
        let token = shutdown.clone();
        Some(tokio::spawn(async move { worker.run(token).await }))
    } else {
        info!("Trend worker disabled");
        None
    };

    let app = create_router(state);
    info!("Beacon listening on {}", config.bind_addr());

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|e| ServerError::Server(e.to_string()));
    shutdown.cancel();

    if let Err(e) = release.await {
        error!("Release task failed: {}", e);
    }
    if let Some(handle) = trends {
        match handle.await {
            Ok(Err(e)) => error!("Trend worker failed: {}", e),
            Err(e) => error!("Trend worker task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }
    match delivery.await {
        Ok(delivered) => info!(delivered, "Delivery task stopped"),
        Err(e) => error!("Delivery task failed: {}", e),
    }

    match Arc::try_unwrap(sqlite) {
        Ok(store) => store.close()?,
        Err(_) => warn!("Store still referenced at shutdown; leaving it to drop"),
    }
    info!("Beacon server stopped");
    served
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}

/// Periodically hand due scheduled notifications to the delivery queue
async fn release_scheduled(
    service: Arc<RiskService>,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let service = Arc::clone(&service);
                match tokio::task::spawn_blocking(move || service.dispatcher().release_now()).await {
                    Ok(Ok(released)) if !released.is_empty() => {
                        info!(count = released.len(), "Scheduled notifications released");
                    }
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Release failed: {}", e),
                    Err(e) => error!("Release task panicked: {}", e),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
