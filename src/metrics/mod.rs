//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Chain connection status and fee-payer balance
//! - Gas price sampling and fallbacks
//! - Transaction submission, rejection and finality
//! - Authorization rejections and batch sizes

use crate::error::{RelayError, RelayResult};
use crate::tx::TxStatus;

use axum::{http::StatusCode, routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram, register_histogram_vec,
    CounterVec, Encoder, GaugeVec, Histogram, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Chain metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "fee_relay_chain_connected",
        "Chain connection status (1=connected, 0=disconnected)",
        &["network"]
    ).expect("metric registration");

    pub static ref CHAIN_BLOCK_HEIGHT: GaugeVec = register_gauge_vec!(
        "fee_relay_chain_block_height",
        "Latest block height seen",
        &["network"]
    ).expect("metric registration");

    pub static ref FEE_PAYER_BALANCE: GaugeVec = register_gauge_vec!(
        "fee_relay_fee_payer_balance",
        "Fee payer balance in native units",
        &["network"]
    ).expect("metric registration");

    // Gas metrics
    pub static ref GAS_PRICE: GaugeVec = register_gauge_vec!(
        "fee_relay_gas_price_gwei",
        "Most recent bounded gas price",
        &["network"]
    ).expect("metric registration");

    pub static ref GAS_PRICE_FALLBACK: CounterVec = register_counter_vec!(
        "fee_relay_gas_price_fallback_total",
        "Gas price reads served from a fallback",
        &["network"]
    ).expect("metric registration");

    pub static ref GAS_LIMIT_FALLBACK: CounterVec = register_counter_vec!(
        "fee_relay_gas_limit_fallback_total",
        "Gas limit estimates that fell back to the configured ceiling",
        &[]
    ).expect("metric registration");

    // Transaction metrics
    pub static ref AUTH_REJECTED: CounterVec = register_counter_vec!(
        "fee_relay_auth_rejected_total",
        "Requests rejected for a bad user signature",
        &[]
    ).expect("metric registration");

    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "fee_relay_transactions_submitted_total",
        "Total transactions accepted by the network",
        &["network"]
    ).expect("metric registration");

    pub static ref TX_FAILED: CounterVec = register_counter_vec!(
        "fee_relay_transactions_failed_total",
        "Total broadcasts that failed, by error kind",
        &["network", "kind"]
    ).expect("metric registration");

    pub static ref TX_FINAL: CounterVec = register_counter_vec!(
        "fee_relay_transactions_final_total",
        "Transactions observed in a terminal state",
        &["network", "status"]
    ).expect("metric registration");

    pub static ref TX_LATENCY: HistogramVec = register_histogram_vec!(
        "fee_relay_broadcast_latency_seconds",
        "Time for the node to accept a broadcast",
        &["network"],
        vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).expect("metric registration");

    pub static ref BATCH_SIZE: Histogram = register_histogram!(
        "fee_relay_batch_size",
        "Number of items per batch request",
        vec![1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0]
    ).expect("metric registration");

    // Health metrics
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "fee_relay_health_check_success_total",
        "Total successful health checks",
        &[]
    ).expect("metric registration");

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "fee_relay_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).expect("metric registration");
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> RelayResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::Internal(format!("Metrics bind failed: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| RelayError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn gwei(wei: U256) -> f64 {
    wei.low_u128() as f64 / 1e9
}

// Helper functions to record metrics

pub fn record_chain_health(network: &str, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[network])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_block_height(network: &str, block_number: u64) {
    CHAIN_BLOCK_HEIGHT
        .with_label_values(&[network])
        .set(block_number as f64);
}

pub fn record_fee_payer_balance(network: &str, balance: f64) {
    FEE_PAYER_BALANCE.with_label_values(&[network]).set(balance);
}

pub fn record_gas_price(network: &str, gas_price: U256) {
    GAS_PRICE.with_label_values(&[network]).set(gwei(gas_price));
}

pub fn record_gas_price_fallback(network: &str) {
    GAS_PRICE_FALLBACK.with_label_values(&[network]).inc();
}

pub fn record_gas_limit_fallback() {
    GAS_LIMIT_FALLBACK.with_label_values(&[]).inc();
}

pub fn record_auth_rejected() {
    AUTH_REJECTED.with_label_values(&[]).inc();
}

pub fn record_tx_submitted(network: &str) {
    TX_SUBMITTED.with_label_values(&[network]).inc();
}

pub fn record_tx_failed(network: &str, kind: &str) {
    TX_FAILED.with_label_values(&[network, kind]).inc();
}

pub fn record_tx_final(network: &str, status: TxStatus) {
    TX_FINAL
        .with_label_values(&[network, status.as_str()])
        .inc();
}

pub fn record_tx_latency(network: &str, latency_secs: f64) {
    TX_LATENCY
        .with_label_values(&[network])
        .observe(latency_secs);
}

pub fn record_batch_size(size: usize) {
    BATCH_SIZE.observe(size as f64);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gas_price_gauge_is_in_gwei() {
        record_gas_price("metrics-test", U256::from(27_500_000_000u64));
        let value = GAS_PRICE.with_label_values(&["metrics-test"]).get();
        assert!((value - 27.5).abs() < f64::EPSILON);
    }

    #[test]
    fn failures_are_labelled_by_kind() {
        record_tx_failed("metrics-test", "timeout");
        record_tx_failed("metrics-test", "timeout");
        record_tx_failed("metrics-test", "submission");
        assert_eq!(
            TX_FAILED
                .with_label_values(&["metrics-test", "timeout"])
                .get(),
            2.0
        );
    }
}
