//! Gas limit estimation with a safety margin

use super::with_buffer;
use crate::chain::RelayRpc;
use crate::config::GasConfig;
use crate::error::RelayError;
use crate::tx::{CallRequest, TransactionRequest};

use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Gas limit estimator for sponsored calls
pub struct GasLimitEstimator {
    rpc: Arc<dyn RelayRpc>,
    /// Buffer percentage for gas limit (e.g., 20 = 20% buffer)
    buffer_percent: u64,
    /// Protocol minimum for any transaction
    min_gas_limit: u64,
    /// Used when simulation fails
    fallback_gas_limit: u64,
    rpc_timeout: Duration,
}

impl GasLimitEstimator {
    pub fn new(rpc: Arc<dyn RelayRpc>, config: &GasConfig, rpc_timeout: Duration) -> Self {
        Self {
            rpc,
            buffer_percent: config.limit_buffer_percent,
            min_gas_limit: config.min_gas_limit,
            fallback_gas_limit: config.fallback_gas_limit,
            rpc_timeout,
        }
    }

    /// Gas limit for a request: the caller's own limit if given, else a simulation
    pub async fn resolve(&self, request: &TransactionRequest) -> u64 {
        match request.gas_limit {
            Some(limit) => limit.max(self.min_gas_limit),
            None => self.estimate(&request.call()).await,
        }
    }

    /// Simulate the call and add the safety buffer.
    ///
    /// Simulation failures (revert, unreachable node, timeout) return the
    /// configured fallback instead of an error.
    pub async fn estimate(&self, call: &CallRequest) -> u64 {
        let simulated = match timeout(self.rpc_timeout, self.rpc.estimate_gas(call)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::timeout("gas estimation")),
        };

        match simulated {
            Ok(raw) => {
                let limit = self.apply_buffer(raw);
                debug!("Gas estimate for {:?}: raw {} -> {}", call.to, raw, limit);
                limit
            }
            Err(e) => {
                warn!(
                    "Gas estimation failed for {:?}, using fallback {}: {}",
                    call.to, self.fallback_gas_limit, e
                );
                crate::metrics::record_gas_limit_fallback();
                self.fallback_gas_limit.max(self.min_gas_limit)
            }
        }
    }

    fn apply_buffer(&self, raw: U256) -> u64 {
        let buffered = with_buffer(raw, self.buffer_percent);
        let limit = buffered.min(U256::from(u64::MAX)).as_u64();
        limit.max(self.min_gas_limit)
    }
}
