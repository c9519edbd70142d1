//! Relay pipeline and the context object that owns it
//!
//! A single sponsored transaction goes through:
//! 1. Nonce resolution (caller-supplied or read from the chain)
//! 2. Authorization check of the user's signature
//! 3. Gas limit and gas price estimation
//! 4. Fee-delegated envelope construction
//! 5. Broadcast and record creation

pub mod batch;

pub use batch::{BatchCoordinator, BatchItem, BatchResult};

use crate::chain::{FeeData, RelayRpc};
use crate::config::Settings;
use crate::error::{RelayError, RelayResult};
use crate::gas::{GasEstimate, GasLimitEstimator, GasPriceOracle};
use crate::state::RelayStore;
use crate::tx::{
    AuthorizationValidator, FeeDelegationBuilder, NonceRegistry, TransactionRecord,
    TransactionRequest, TransactionSubmitter, TransactionTracker,
};

use ethers::types::Address;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Claims held for one sender before an explicit-nonce request triggers a
/// prune against the chain
const PRUNE_THRESHOLD: usize = 16;

/// Single-item relay pipeline
pub struct Relay {
    rpc: Arc<dyn RelayRpc>,
    oracle: GasPriceOracle,
    limits: GasLimitEstimator,
    validator: AuthorizationValidator,
    builder: FeeDelegationBuilder,
    submitter: TransactionSubmitter,
    nonces: Arc<NonceRegistry>,
    chain_id: u64,
    rpc_timeout: Duration,
}

impl Relay {
    pub fn new(
        settings: &Settings,
        rpc: Arc<dyn RelayRpc>,
        store: Arc<dyn RelayStore>,
        builder: FeeDelegationBuilder,
    ) -> Self {
        let rpc_timeout = settings.relayer.rpc_timeout();
        let network = settings.chain.network.clone();
        let nonces = Arc::new(NonceRegistry::new());

        Self {
            oracle: GasPriceOracle::new(
                rpc.clone(),
                store.clone(),
                settings.gas.clone(),
                network.clone(),
                rpc_timeout,
            ),
            limits: GasLimitEstimator::new(rpc.clone(), &settings.gas, rpc_timeout),
            validator: AuthorizationValidator::new(),
            builder,
            submitter: TransactionSubmitter::new(
                rpc.clone(),
                store,
                nonces.clone(),
                network,
                rpc_timeout,
            ),
            rpc,
            nonces,
            chain_id: settings.chain.chain_id,
            rpc_timeout,
        }
    }

    /// Validate, price, envelope and broadcast one sponsored transaction
    pub async fn relay(
        &self,
        request: TransactionRequest,
        signature: &[u8],
    ) -> RelayResult<TransactionRecord> {
        let nonce = self.resolve_nonce(&request).await?;
        let request = request.with_nonce(nonce);

        let authorized = self.validator.validate(&request, signature)?;
        let estimate = self.estimate(&request).await;
        let envelope = self
            .builder
            .build(&authorized, &estimate, nonce, self.chain_id)?;

        self.submitter.submit(envelope).await
    }

    /// Fresh gas parameters for one request. Never fails.
    pub async fn estimate(&self, request: &TransactionRequest) -> GasEstimate {
        let (sample, gas_limit, fee_data) = tokio::join!(
            self.oracle.current(),
            self.limits.resolve(request),
            self.fee_data()
        );

        let estimate = GasEstimate::new(
            gas_limit,
            sample.gas_price,
            &fee_data,
            self.oracle.max_gas_price(),
        );
        debug!(
            "Estimate for {:?}: limit {} price {} cost {}",
            request.user_address, estimate.gas_limit, estimate.gas_price, estimate.estimated_cost
        );
        estimate
    }

    pub fn oracle(&self) -> &GasPriceOracle {
        &self.oracle
    }

    pub fn fee_payer(&self) -> Address {
        self.builder.fee_payer()
    }

    async fn fee_data(&self) -> FeeData {
        match timeout(self.rpc_timeout, self.rpc.get_fee_data()).await {
            Ok(Ok(fee_data)) => fee_data,
            Ok(Err(e)) => {
                debug!("Fee data unavailable: {}", e);
                FeeData::default()
            }
            Err(_) => {
                debug!("Fee data timed out");
                FeeData::default()
            }
        }
    }

    async fn resolve_nonce(&self, request: &TransactionRequest) -> RelayResult<u64> {
        if let Some(nonce) = request.nonce {
            if self.nonces.pending_count(request.user_address) >= PRUNE_THRESHOLD {
                self.prune_claims(request.user_address).await;
            }
            return Ok(nonce);
        }

        let on_chain = timeout(
            self.rpc_timeout,
            self.rpc.get_transaction_count(request.user_address),
        )
        .await
        .map_err(|_| RelayError::timeout("get_transaction_count"))??;

        self.nonces.prune(request.user_address, on_chain);
        Ok(on_chain)
    }

    /// Best effort; a failed lookup leaves the claims for the next attempt
    async fn prune_claims(&self, user: Address) {
        match timeout(self.rpc_timeout, self.rpc.get_transaction_count(user)).await {
            Ok(Ok(on_chain)) => self.nonces.prune(user, on_chain),
            Ok(Err(e)) => debug!("Nonce prune for {:?} skipped: {}", user, e),
            Err(_) => debug!("Nonce prune for {:?} timed out", user),
        }
    }
}

/// Everything the relay needs, built once at startup and shared by reference
pub struct RelayContext {
    pub relay: Arc<Relay>,
    pub batch: BatchCoordinator,
    pub tracker: Arc<TransactionTracker>,
    pub rpc: Arc<dyn RelayRpc>,
    pub store: Arc<dyn RelayStore>,
}

impl RelayContext {
    pub fn new(
        settings: &Settings,
        rpc: Arc<dyn RelayRpc>,
        store: Arc<dyn RelayStore>,
        builder: FeeDelegationBuilder,
    ) -> Self {
        let relay = Arc::new(Relay::new(settings, rpc.clone(), store.clone(), builder));
        let batch = BatchCoordinator::new(relay.clone(), &settings.batch);
        let tracker = Arc::new(TransactionTracker::new(
            rpc.clone(),
            store.clone(),
            settings.chain.network.clone(),
            settings.relayer.rpc_timeout(),
        ));

        info!(
            "Relay context ready on {} (chain {}, fee payer {:?})",
            settings.chain.network,
            settings.chain.chain_id,
            relay.fee_payer()
        );

        Self {
            relay,
            batch,
            tracker,
            rpc,
            store,
        }
    }
}
