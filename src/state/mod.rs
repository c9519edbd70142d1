//! Persistence collaborator
//!
//! Every call is best-effort from the relay's point of view: a failed write
//! never rolls back a transaction that is already on the network.

mod manager;
mod memory;

pub use manager::StateManager;
pub use memory::MemoryStore;

use crate::error::RelayResult;
use crate::gas::GasPriceSample;
use crate::tx::{TransactionRecord, TxStatus};

use async_trait::async_trait;
use ethers::types::H256;

#[async_trait]
pub trait RelayStore: Send + Sync {
    async fn save_transaction_record(&self, record: &TransactionRecord) -> RelayResult<()>;

    async fn update_transaction_status(&self, tx_hash: H256, status: TxStatus) -> RelayResult<()>;

    async fn save_gas_price_sample(&self, sample: &GasPriceSample) -> RelayResult<()>;

    async fn health_check(&self) -> RelayResult<()>;
}
