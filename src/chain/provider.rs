//! Chain provider with multi-RPC support and automatic failover

use super::{FeeData, ReceiptInfo, RelayRpc};
use crate::config::ChainConfig;
use crate::error::{RelayError, RelayResult, SubmissionError};
use crate::tx::{CallRequest, FeeDelegationEnvelope};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, ProviderError, RpcError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::TransactionRequest as EthTransactionRequest;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Priority fee used when the node does not answer `eth_maxPriorityFeePerGas`
const DEFAULT_PRIORITY_FEE_WEI: u64 = 1_000_000_000;

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    /// Chain configuration
    config: ChainConfig,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(config: ChainConfig) -> RelayResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(100));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for {}: {}", config.network, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(RelayError::Config(format!(
                "No valid RPC providers for {}",
                config.network
            )));
        }

        Ok(Self {
            config,
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("{} failover to provider {}", self.config.network, next);
    }

    /// Run a read-only call, rotating through providers on failure
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> RelayResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = None;
        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!("{} failed on {}: {}", operation, self.config.network, e);
                    last_error = Some(e);
                    self.failover();
                }
            }
        }

        Err(RelayError::Rpc(format!(
            "{}: all providers failed ({})",
            operation,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// EIP-1559 fees from the latest block: max = 2 * base + priority
    async fn estimate_eip1559_fees(&self) -> RelayResult<Option<(U256, U256)>> {
        let block = self
            .with_failover("get_block", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await?;

        let base_fee = match block.and_then(|b| b.base_fee_per_gas) {
            Some(fee) => fee,
            None => return Ok(None),
        };

        let priority_fee = match self
            .http()
            .request::<_, U256>("eth_maxPriorityFeePerGas", ())
            .await
        {
            Ok(fee) => fee,
            Err(e) => {
                debug!("eth_maxPriorityFeePerGas unavailable: {}", e);
                U256::from(DEFAULT_PRIORITY_FEE_WEI)
            }
        };

        Ok(Some((base_fee * 2 + priority_fee, priority_fee)))
    }

    /// Get network label
    pub fn network(&self) -> &str {
        &self.config.network
    }
}

#[async_trait]
impl RelayRpc for ChainProvider {
    async fn get_gas_price(&self) -> RelayResult<U256> {
        self.with_failover("get_gas_price", |p| async move { p.get_gas_price().await })
            .await
    }

    async fn estimate_gas(&self, call: &CallRequest) -> RelayResult<U256> {
        let mut tx = EthTransactionRequest::new()
            .to(call.to)
            .data(call.data.clone())
            .value(call.value);
        if let Some(from) = call.from {
            tx = tx.from(from);
        }
        let typed = TypedTransaction::Legacy(tx);

        self.http()
            .estimate_gas(&typed, None)
            .await
            .map_err(|e| RelayError::Estimation(e.to_string()))
    }

    async fn get_fee_data(&self) -> RelayResult<FeeData> {
        let gas_price = self.get_gas_price().await.ok();
        let eip1559 = self.estimate_eip1559_fees().await.unwrap_or_else(|e| {
            debug!("No EIP-1559 fee data on {}: {}", self.config.network, e);
            None
        });

        Ok(FeeData {
            gas_price,
            max_fee_per_gas: eip1559.map(|(max, _)| max),
            max_priority_fee_per_gas: eip1559.map(|(_, priority)| priority),
        })
    }

    async fn send_transaction(&self, envelope: &FeeDelegationEnvelope) -> RelayResult<H256> {
        let raw = envelope.rlp_encoded();

        // Single attempt: a failed broadcast must not be replayed here
        self.http()
            .request::<_, H256>(&self.config.send_raw_method, [raw])
            .await
            .map_err(|e| {
                error!("Broadcast failed on {}: {}", self.config.network, e);
                classify_send_error(e)
            })
    }

    async fn get_transaction_receipt(&self, tx_hash: H256) -> RelayResult<Option<ReceiptInfo>> {
        let receipt = self
            .with_failover("get_transaction_receipt", |p| async move {
                p.get_transaction_receipt(tx_hash).await
            })
            .await?;

        Ok(receipt.map(|r| ReceiptInfo {
            success: r.status == Some(1u64.into()),
            block_number: r.block_number.map(|b| b.as_u64()),
            gas_used: r.gas_used,
        }))
    }

    async fn get_transaction_count(&self, address: Address) -> RelayResult<u64> {
        let count = self
            .with_failover("get_transaction_count", |p| async move {
                p.get_transaction_count(address, Some(BlockNumber::Pending.into()))
                    .await
            })
            .await?;
        Ok(count.as_u64())
    }

    async fn get_chain_id(&self) -> RelayResult<u64> {
        let id = self
            .with_failover("get_chain_id", |p| async move { p.get_chainid().await })
            .await?;
        Ok(id.as_u64())
    }

    async fn get_block_number(&self) -> RelayResult<u64> {
        let block = self
            .with_failover("get_block_number", |p| async move {
                p.get_block_number().await
            })
            .await?;
        Ok(block.as_u64())
    }

    async fn get_balance(&self, address: Address) -> RelayResult<U256> {
        self.with_failover("get_balance", |p| async move {
            p.get_balance(address, None).await
        })
        .await
    }
}

/// Only a JSON-RPC error response proves the node refused the envelope.
/// Anything else (transport, decoding) leaves the outcome unknown.
fn classify_send_error(error: ProviderError) -> RelayError {
    match RpcError::as_error_response(&error) {
        Some(response) => {
            RelayError::Submission(SubmissionError::from_node_message(&response.message))
        }
        None => RelayError::Rpc(format!("broadcast outcome unknown: {}", error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    fn chain_config(urls: Vec<&str>) -> ChainConfig {
        ChainConfig {
            network: "kairos".to_string(),
            chain_id: 1001,
            rpc_urls: urls.into_iter().map(String::from).collect(),
            send_raw_method: "klay_sendRawTransaction".to_string(),
        }
    }

    #[test]
    fn rejects_config_without_usable_urls() {
        assert!(ChainProvider::new(chain_config(vec![])).is_err());
    }

    #[test]
    fn failover_rotates_through_providers() {
        let provider = ChainProvider::new(chain_config(vec![
            "http://127.0.0.1:8551",
            "http://127.0.0.1:8552",
        ]))
        .unwrap();

        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 1);
        provider.failover();
        assert_eq!(provider.current_provider.load(Ordering::Relaxed), 0);
        assert_eq!(provider.network(), "kairos");
    }

    #[test]
    fn node_error_response_is_a_refusal() {
        let error = ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code: -32000,
                message: "insufficient funds for gas * price + value".to_string(),
                data: None,
            },
        )));
        assert!(matches!(
            classify_send_error(error),
            RelayError::Submission(SubmissionError::InsufficientFeePayerBalance)
        ));
    }

    #[test]
    fn transport_failure_is_outcome_unknown() {
        let error = ProviderError::CustomError("connection reset by peer".to_string());
        assert!(matches!(classify_send_error(error), RelayError::Rpc(_)));
    }
}
