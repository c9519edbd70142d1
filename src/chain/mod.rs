//! Chain module - the relay's view of the network
//!
//! This module provides:
//! - The `RelayRpc` seam every relay component talks through
//! - An ethers-backed provider with multi-RPC failover

pub mod provider;

pub use provider::ChainProvider;

use crate::error::RelayResult;
use crate::tx::{CallRequest, FeeDelegationEnvelope};

use async_trait::async_trait;
use ethers::types::{Address, H256, U256};

/// EIP-1559 style fee fields; any of them may be unavailable
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeeData {
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

/// The parts of a receipt the relay cares about
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptInfo {
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Network RPC collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayRpc: Send + Sync {
    async fn get_gas_price(&self) -> RelayResult<U256>;

    async fn estimate_gas(&self, call: &CallRequest) -> RelayResult<U256>;

    async fn get_fee_data(&self) -> RelayResult<FeeData>;

    /// Broadcast a fully signed envelope, returning its hash
    async fn send_transaction(&self, envelope: &FeeDelegationEnvelope) -> RelayResult<H256>;

    async fn get_transaction_receipt(&self, tx_hash: H256) -> RelayResult<Option<ReceiptInfo>>;

    async fn get_transaction_count(&self, address: Address) -> RelayResult<u64>;

    async fn get_chain_id(&self) -> RelayResult<u64>;

    async fn get_block_number(&self) -> RelayResult<u64>;

    async fn get_balance(&self, address: Address) -> RelayResult<U256>;
}
