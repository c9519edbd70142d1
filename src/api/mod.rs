//! HTTP API for health checks, gas price and transaction status

use crate::config::ApiConfig;
use crate::error::{RelayError, RelayResult};
use crate::relay::RelayContext;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use ethers::types::{H256, U256};
use ethers::utils::format_ether;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<RelayContext>,
}

pub fn router(context: Arc<RelayContext>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/gas-price", get(gas_price))
        .route("/transactions/:hash", get(transaction_status))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(AppState { context })
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, context: Arc<RelayContext>) -> RelayResult<()> {
    let app = router(context);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| RelayError::Internal(format!("API bind to {} failed: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| RelayError::Internal(format!("API server failed: {}", e)))?;

    Ok(())
}

/// Health check endpoint - basic liveness
async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check - RPC reachable, store healthy, fee payer funded
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let context = &state.context;
    let fee_payer = context.relay.fee_payer();

    let (block, store, balance) = tokio::join!(
        context.rpc.get_block_number(),
        context.store.health_check(),
        context.rpc.get_balance(fee_payer)
    );

    let balance = balance.ok();
    let funded = balance.map(|b| !b.is_zero()).unwrap_or(false);
    let response = ReadinessResponse {
        ready: block.is_ok() && store.is_ok() && funded,
        rpc: block.is_ok(),
        store: store.is_ok(),
        block_number: block.ok(),
        fee_payer: format!("{:?}", fee_payer),
        fee_payer_balance: balance.map(format_ether),
    };

    let status = if response.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// Current bounded gas price
async fn gas_price(State(state): State<AppState>) -> impl IntoResponse {
    let oracle = state.context.relay.oracle();
    let sample = oracle.current().await;

    Json(GasPriceResponse {
        network: sample.network,
        gas_price: sample.gas_price,
        min_gas_price: oracle.min_gas_price(),
        max_gas_price: oracle.max_gas_price(),
        fetched_at: sample.fetched_at.to_rfc3339(),
    })
}

/// Tracker status for one relayed transaction
async fn transaction_status(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> axum::response::Response {
    let tx_hash = match hash.parse::<H256>() {
        Ok(tx_hash) => tx_hash,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("invalid transaction hash: {}", hash),
                }),
            )
                .into_response()
        }
    };

    match state.context.tracker.status(tx_hash).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            debug!("Status lookup for {:?} failed: {}", tx_hash, e);
            let status = if e.is_retryable() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (
                status,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

// Response types

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    ready: bool,
    rpc: bool,
    store: bool,
    block_number: Option<u64>,
    fee_payer: String,
    fee_payer_balance: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GasPriceResponse {
    network: String,
    gas_price: U256,
    min_gas_price: U256,
    max_gas_price: U256,
    fetched_at: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}
