//! Receipt-based status tracking for relayed transactions

use super::types::TxStatus;
use crate::chain::{ReceiptInfo, RelayRpc};
use crate::error::{RelayError, RelayResult};
use crate::state::RelayStore;

use dashmap::DashMap;
use ethers::types::{H256, U256};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Point-in-time view of a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TxStatusReport {
    pub state: TxStatus,
    pub confirmations: u64,
    pub gas_used: Option<U256>,
    pub block_number: Option<u64>,
}

/// Tracks relayed transactions to a terminal state
pub struct TransactionTracker {
    rpc: Arc<dyn RelayRpc>,
    store: Arc<dyn RelayStore>,
    network: String,
    rpc_timeout: Duration,
    /// Terminal receipts, cached to avoid re-checking
    finalized: DashMap<H256, ReceiptInfo>,
}

impl TransactionTracker {
    pub fn new(
        rpc: Arc<dyn RelayRpc>,
        store: Arc<dyn RelayStore>,
        network: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            store,
            network: network.into(),
            rpc_timeout,
            finalized: DashMap::new(),
        }
    }

    /// Current status. No receipt means pending with zero confirmations;
    /// a terminal state never changes once observed.
    pub async fn status(&self, tx_hash: H256) -> RelayResult<TxStatusReport> {
        let cached = self.finalized.get(&tx_hash).map(|r| r.clone());
        if let Some(receipt) = cached {
            let current_block = self.block_number().await.ok();
            return Ok(report(&receipt, current_block));
        }

        let receipt = self
            .call("get_transaction_receipt", self.rpc.get_transaction_receipt(tx_hash))
            .await?;

        let receipt = match receipt {
            Some(receipt) => receipt,
            None => {
                debug!("No receipt yet for {:?}", tx_hash);
                return Ok(TxStatusReport {
                    state: TxStatus::Pending,
                    confirmations: 0,
                    gas_used: None,
                    block_number: None,
                });
            }
        };

        let current_block = self.block_number().await.ok();
        let report = report(&receipt, current_block);

        if self.finalized.insert(tx_hash, receipt).is_none() {
            info!(
                "Transaction {:?} reached {} on {} (block {:?})",
                tx_hash, report.state, self.network, report.block_number
            );
            crate::metrics::record_tx_final(&self.network, report.state);
            if let Err(e) = self
                .store
                .update_transaction_status(tx_hash, report.state)
                .await
            {
                warn!("Failed to persist status for {:?}: {}", tx_hash, e);
            }
        }

        Ok(report)
    }

    /// Poll `status` until the transaction is terminal or `deadline` passes
    pub async fn wait_for_final(
        &self,
        tx_hash: H256,
        poll_interval: Duration,
        deadline: Duration,
    ) -> RelayResult<TxStatusReport> {
        let give_up = Instant::now() + deadline;
        loop {
            match self.status(tx_hash).await {
                Ok(report) if report.state.is_terminal() => return Ok(report),
                Ok(_) => {}
                Err(e) if e.is_retryable() => {
                    debug!("Status poll for {:?} failed: {}", tx_hash, e);
                }
                Err(e) => return Err(e),
            }

            if Instant::now() + poll_interval > give_up {
                return Err(RelayError::timeout(format!("finality of {:?}", tx_hash)));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Forget cached terminal receipts (call periodically)
    pub fn cleanup_cache(&self, max_entries: usize) {
        if self.finalized.len() > max_entries {
            let to_remove: Vec<H256> = self
                .finalized
                .iter()
                .take(self.finalized.len() / 2)
                .map(|entry| *entry.key())
                .collect();
            for tx_hash in to_remove {
                self.finalized.remove(&tx_hash);
            }
        }
    }

    async fn block_number(&self) -> RelayResult<u64> {
        self.call("get_block_number", self.rpc.get_block_number())
            .await
    }

    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = RelayResult<T>>,
    ) -> RelayResult<T> {
        timeout(self.rpc_timeout, fut)
            .await
            .map_err(|_| RelayError::timeout(operation))?
    }
}

fn report(receipt: &ReceiptInfo, current_block: Option<u64>) -> TxStatusReport {
    let confirmations = match (receipt.block_number, current_block) {
        (Some(mined), Some(current)) => current.saturating_sub(mined) + 1,
        (Some(_), None) => 1,
        _ => 0,
    };

    TxStatusReport {
        state: if receipt.success {
            TxStatus::Success
        } else {
            TxStatus::Failed
        },
        confirmations,
        gas_used: receipt.gas_used,
        block_number: receipt.block_number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MockRelayRpc;
    use crate::state::MemoryStore;

    fn tracker(rpc: MockRelayRpc) -> TransactionTracker {
        TransactionTracker::new(
            Arc::new(rpc),
            Arc::new(MemoryStore::new()),
            "kairos",
            Duration::from_secs(1),
        )
    }

    fn receipt(success: bool) -> ReceiptInfo {
        ReceiptInfo {
            success,
            block_number: Some(100),
            gas_used: Some(U256::from(21_000u64)),
        }
    }

    #[tokio::test]
    async fn missing_receipt_is_pending() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_get_transaction_receipt().returning(|_| Ok(None));

        let report = tracker(rpc).status(H256::repeat_byte(1)).await.unwrap();
        assert_eq!(report.state, TxStatus::Pending);
        assert_eq!(report.confirmations, 0);
        assert!(report.block_number.is_none());
    }

    #[tokio::test]
    async fn receipt_status_maps_to_terminal_state() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_get_transaction_receipt()
            .returning(|hash| Ok(Some(receipt(hash == H256::repeat_byte(1)))));
        rpc.expect_get_block_number().returning(|| Ok(104));
        let tracker = tracker(rpc);

        let ok = tracker.status(H256::repeat_byte(1)).await.unwrap();
        assert_eq!(ok.state, TxStatus::Success);
        assert_eq!(ok.confirmations, 5);
        assert_eq!(ok.gas_used, Some(U256::from(21_000u64)));

        let reverted = tracker.status(H256::repeat_byte(2)).await.unwrap();
        assert_eq!(reverted.state, TxStatus::Failed);
    }

    #[tokio::test]
    async fn terminal_state_is_stable_across_polls() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_get_transaction_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(false))));
        rpc.expect_get_block_number().returning(|| Ok(100));
        let tracker = tracker(rpc);

        let hash = H256::repeat_byte(3);
        let first = tracker.status(hash).await.unwrap();
        for _ in 0..5 {
            assert_eq!(tracker.status(hash).await.unwrap(), first);
        }
    }

    #[tokio::test]
    async fn terminal_transition_updates_store() {
        use crate::tx::TransactionRecord;
        use chrono::Utc;
        use ethers::types::{Address, Bytes};
        use uuid::Uuid;

        let store = Arc::new(MemoryStore::new());
        let hash = H256::repeat_byte(4);
        store
            .save_transaction_record(&TransactionRecord {
                id: Uuid::new_v4(),
                user_address: Address::repeat_byte(1),
                to: Address::repeat_byte(2),
                data: Bytes::default(),
                value: U256::zero(),
                tx_hash: hash,
                gas_price: U256::one(),
                gas_limit: 21_000,
                fee_payer: Address::repeat_byte(3),
                submitted_at: Utc::now(),
                status: TxStatus::Pending,
            })
            .await
            .unwrap();

        let mut rpc = MockRelayRpc::new();
        rpc.expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(true))));
        rpc.expect_get_block_number().returning(|| Ok(100));
        let tracker = TransactionTracker::new(
            Arc::new(rpc),
            store.clone(),
            "kairos",
            Duration::from_secs(1),
        );

        tracker.status(hash).await.unwrap();
        tracker.status(hash).await.unwrap();
        assert_eq!(store.record(hash).await.unwrap().status, TxStatus::Success);
    }

    #[tokio::test]
    async fn wait_for_final_returns_once_mined() {
        let mut rpc = MockRelayRpc::new();
        let mut polls = 0;
        rpc.expect_get_transaction_receipt().returning(move |_| {
            polls += 1;
            Ok((polls >= 3).then(|| receipt(true)))
        });
        rpc.expect_get_block_number().returning(|| Ok(100));

        let report = tracker(rpc)
            .wait_for_final(
                H256::repeat_byte(5),
                Duration::from_millis(5),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(report.state, TxStatus::Success);
        assert_eq!(report.confirmations, 1);
    }

    #[tokio::test]
    async fn wait_for_final_times_out() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_get_transaction_receipt().returning(|_| Ok(None));

        let err = tracker(rpc)
            .wait_for_final(
                H256::repeat_byte(6),
                Duration::from_millis(5),
                Duration::from_millis(20),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Timeout { .. }));
    }
}
