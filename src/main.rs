//! Fee Relay - sponsors gas for user transactions
//!
//! Users sign an authorization over `(to, data, value, nonce)`; the relay
//! verifies it, prices the call, wraps it in a fee-delegated envelope signed
//! by the fee-payer account and broadcasts it, alone or in paced batches.

use anyhow::Result;
use ethers::utils::format_ether;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use fee_relay::api;
use fee_relay::chain::{ChainProvider, RelayRpc};
use fee_relay::config::Settings;
use fee_relay::metrics::{self, MetricsServer};
use fee_relay::state::{MemoryStore, RelayStore, StateManager};
use fee_relay::tx::FeeDelegationBuilder;
use fee_relay::RelayContext;

/// Terminal receipts kept by the tracker between health ticks
const TRACKER_CACHE_ENTRIES: usize = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Fee Relay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} (chain {}, instance {})",
        settings.chain.network, settings.chain.chain_id, settings.relayer.instance_id
    );

    // Initialize chain provider (handles RPC failover)
    let provider = Arc::new(ChainProvider::new(settings.chain.clone())?);
    let rpc: Arc<dyn RelayRpc> = provider.clone();

    match rpc.get_chain_id().await {
        Ok(chain_id) if chain_id != settings.chain.chain_id => {
            anyhow::bail!(
                "RPC reports chain {} but configuration expects {}",
                chain_id,
                settings.chain.chain_id
            );
        }
        Ok(_) => info!("Connected to {}", provider.network()),
        Err(e) => warn!("Could not verify chain id at startup: {}", e),
    }

    // Initialize persistence
    let store: Arc<dyn RelayStore> = match &settings.database {
        Some(database) => {
            let state_manager = StateManager::new(database).await?;
            info!("Database connection established");
            state_manager.run_migrations().await?;
            info!("Database migrations complete");
            Arc::new(state_manager)
        }
        None => {
            warn!("No [database] configured, records are kept in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    // Load fee payer key
    let builder = FeeDelegationBuilder::from_env(&settings.fee_payer)?;
    info!(
        "Fee payer {:?} covering {}% of fees",
        builder.fee_payer(),
        builder.fee_ratio()
    );

    let context = Arc::new(RelayContext::new(&settings, rpc.clone(), store.clone(), builder));

    // Start API server
    let api_handle = tokio::spawn({
        let config = settings.api.clone();
        let context = context.clone();
        async move {
            if let Err(e) = api::run_server(config, context).await {
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

    // Health check loop
    let health_handle = tokio::spawn({
        let context = context.clone();
        let network = settings.chain.network.clone();
        let interval = settings.relayer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
                let mut healthy = true;

                // Check chain connection
                match context.rpc.get_block_number().await {
                    Ok(block) => {
                        metrics::record_chain_health(&network, true);
                        metrics::record_block_height(&network, block);
                    }
                    Err(e) => {
                        warn!("Chain {} health check failed: {}", network, e);
                        metrics::record_chain_health(&network, false);
                        healthy = false;
                    }
                }

                // Check fee payer balance
                match context.rpc.get_balance(context.relay.fee_payer()).await {
                    Ok(balance) => {
                        if balance.is_zero() {
                            warn!("Fee payer balance is zero, broadcasts will be refused");
                        }
                        if let Ok(balance) = format_ether(balance).parse::<f64>() {
                            metrics::record_fee_payer_balance(&network, balance);
                        }
                    }
                    Err(e) => warn!("Fee payer balance check failed: {}", e),
                }

                // Check persistence
                if let Err(e) = context.store.health_check().await {
                    warn!("Store health check failed: {}", e);
                    healthy = false;
                }

                context.tracker.cleanup_cache(TRACKER_CACHE_ENTRIES);

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Fee Relay is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Fee Relay stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fee_relay=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
