//! Meta-transaction relay server
//!
//! Wraps user-submitted meta-transactions in relay-signed chain transactions:
//! assigns nonces, signs with the manager and worker identities, persists
//! every in-flight transaction before broadcasting, and reprices the stuck
//! ones until they confirm.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

mod api;
mod chain;
mod config;
mod error;
mod keys;
mod metrics;
mod sweeper;
mod tx;

use chain::{ChainInteractor, RpcChainInteractor};
use config::Settings;
use keys::KeyManager;
use metrics::MetricsServer;
use sweeper::Sweeper;
use tx::{GasPolicy, TransactionManager, TxStore};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting metarelay v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;

    std::fs::create_dir_all(&settings.relay.workdir)
        .with_context(|| format!("Failed to create workdir {:?}", settings.relay.workdir))?;

    // Signing identities; keys are loaded once and never leave the process.
    let manager_keys = Arc::new(KeyManager::from_env(
        &settings.keys.manager_key_env,
        settings.chain.chain_id,
    )?);
    let worker_keys = Arc::new(KeyManager::from_env(
        &settings.keys.worker_keys_env,
        settings.chain.chain_id,
    )?);
    info!(
        manager = ?manager_keys.address(0),
        workers = worker_keys.addresses().len(),
        "Signing keys loaded"
    );

    let store = Arc::new(TxStore::open(&settings.relay.workdir, settings.relay.dev_mode).await?);
    info!("Transaction store opened under {:?}", settings.relay.workdir);

    let chain: Arc<dyn ChainInteractor> = Arc::new(RpcChainInteractor::new(&settings.chain)?);
    info!(
        chain_id = settings.chain.chain_id,
        rpc_urls = settings.chain.rpc_urls.len(),
        "Chain client initialized"
    );

    let gas_policy = GasPolicy::new(
        settings.gas.retry_gas_price_factor,
        settings.gas.max_gas_price_wei.into(),
        settings.gas.estimate_gas_factor,
        settings.gas.default_gas_limit,
    );

    let manager = Arc::new(TransactionManager::new(
        chain.clone(),
        store.clone(),
        manager_keys,
        worker_keys,
        gas_policy,
        settings.relay.confirmations_needed,
        settings.relay.pending_transaction_timeout_blocks,
    ));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let state = api::AppState {
            chain: chain.clone(),
            store: store.clone(),
            manager: manager.clone(),
        };
        async move {
            if let Err(e) = api::run_server(config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start the confirmation/repricing sweeper
    let sweeper = Arc::new(Sweeper::new(
        chain.clone(),
        manager.clone(),
        settings.relay.sweep_interval_ms,
    ));
    let sweeper_handle = tokio::spawn({
        let sweeper = sweeper.clone();
        async move {
            sweeper.run().await;
        }
    });

    info!("metarelay is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    sweeper.stop().await;

    api_handle.abort();
    sweeper_handle.abort();
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("metarelay stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,metarelay=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
