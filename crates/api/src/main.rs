//! Gateway server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::config::Config;
use saga::services::{HttpOracleNetwork, NominatimGeocoder, RpcLedger};
use saga::{CorrelationStore, SagaCoordinator};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

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
    // 1. Load configuration
    let config = Config::load().expect("failed to load configuration");

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Unlock the service key
    let password = config
        .keystore
        .password
        .as_deref()
        .expect("KEYSTORE_PASSWORD must be set");
    let keypair =
        keystore::load_keypair(&config.keystore.path, password).expect("failed to unlock keystore");
    tracing::info!(public_key = %keypair.public_key(), "service key loaded");

    // 5. Wire the saga against live services
    if config.oracles.is_empty() {
        tracing::warn!("no oracles configured; every locate request will time out");
    }
    let store = CorrelationStore::new();
    let oracles = HttpOracleNetwork::new(
        config.oracles.clone(),
        Duration::from_secs(config.saga.oracle_timeout_secs),
    )
    .expect("failed to build oracle client");
    let geocoder = NominatimGeocoder::new(config.geocoder.url.clone(), &config.geocoder.user_agent)
        .expect("failed to build geocoder client");
    let ledger = RpcLedger::new(config.ledger.rpc_url.clone()).expect("failed to build ledger client");
    let saga = Arc::new(SagaCoordinator::new(
        store.clone(),
        oracles,
        geocoder,
        ledger,
        keypair,
        config.saga_config(),
    ));

    let state = api::build_state(saga, config.session_config())
        .expect("failed to register session handlers");

    // 6. Start the stale-saga sweeper
    let shutdown = CancellationToken::new();
    let sweeper = api::sweeper::spawn_sweeper(
        store,
        Duration::from_secs(config.saga.approval_ttl_secs),
        Duration::from_secs(config.saga.sweep_interval_secs),
        shutdown.clone(),
    );

    // 7. Build the application and serve
    let app = api::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting gateway server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    shutdown.cancel();
    let _ = sweeper.await;
    tracing::info!("server shut down gracefully");
}
