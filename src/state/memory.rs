//! In-memory store for development and tests. Nothing survives a restart.

use super::RelayStore;
use crate::error::{RelayError, RelayResult};
use crate::gas::GasPriceSample;
use crate::tx::{TransactionRecord, TxStatus};

use async_trait::async_trait;
use ethers::types::H256;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<H256, TransactionRecord>>,
    samples: RwLock<Vec<GasPriceSample>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, tx_hash: H256) -> Option<TransactionRecord> {
        self.records.read().await.get(&tx_hash).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn samples(&self) -> Vec<GasPriceSample> {
        self.samples.read().await.clone()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn save_transaction_record(&self, record: &TransactionRecord) -> RelayResult<()> {
        self.records
            .write()
            .await
            .insert(record.tx_hash, record.clone());
        Ok(())
    }

    async fn update_transaction_status(&self, tx_hash: H256, status: TxStatus) -> RelayResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&tx_hash)
            .ok_or_else(|| RelayError::Storage(format!("no record for {:?}", tx_hash)))?;
        record.transition(status)
    }

    async fn save_gas_price_sample(&self, sample: &GasPriceSample) -> RelayResult<()> {
        self.samples.write().await.push(sample.clone());
        Ok(())
    }

    async fn health_check(&self) -> RelayResult<()> {
        Ok(())
    }
}
