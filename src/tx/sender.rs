//! Envelope broadcast. One attempt per envelope, no implicit retry.

use super::envelope::FeeDelegationEnvelope;
use super::nonce::NonceRegistry;
use super::types::{TransactionRecord, TxStatus};
use crate::chain::RelayRpc;
use crate::error::{RelayError, RelayResult};
use crate::state::RelayStore;

use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sends envelopes and hands the resulting records to persistence
pub struct TransactionSubmitter {
    rpc: Arc<dyn RelayRpc>,
    store: Arc<dyn RelayStore>,
    nonces: Arc<NonceRegistry>,
    network: String,
    rpc_timeout: Duration,
}

impl TransactionSubmitter {
    pub fn new(
        rpc: Arc<dyn RelayRpc>,
        store: Arc<dyn RelayStore>,
        nonces: Arc<NonceRegistry>,
        network: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            store,
            nonces,
            network: network.into(),
            rpc_timeout,
        }
    }

    /// Broadcast the envelope and return a `pending` record.
    ///
    /// Rejections are returned as-is; callers wanting a retry must build a
    /// fresh envelope.
    pub async fn submit(&self, envelope: FeeDelegationEnvelope) -> RelayResult<TransactionRecord> {
        let sender = envelope.sender();
        let nonce = envelope.nonce();
        self.nonces.claim(sender, nonce)?;

        let started = Instant::now();
        let tx_hash = match timeout(self.rpc_timeout, self.rpc.send_transaction(&envelope)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(e @ RelayError::Submission(_))) => {
                // The node refused it, the nonce is free again
                self.nonces.release(sender, nonce);
                if e.should_alert() {
                    error!("Broadcast for {:?} nonce {} rejected: {}", sender, nonce, e);
                } else {
                    warn!("Broadcast for {:?} nonce {} rejected: {}", sender, nonce, e);
                }
                crate::metrics::record_tx_failed(&self.network, e.kind());
                return Err(e);
            }
            Ok(Err(e)) => {
                // Transport failure after the request left; the node may hold it
                warn!(
                    "Broadcast for {:?} nonce {} outcome unknown: {}",
                    sender, nonce, e
                );
                crate::metrics::record_tx_failed(&self.network, e.kind());
                return Err(e);
            }
            Err(_) => {
                // Outcome unknown; keep the claim until the chain nonce moves past it
                warn!("Broadcast for {:?} nonce {} timed out", sender, nonce);
                crate::metrics::record_tx_failed(&self.network, "timeout");
                return Err(RelayError::timeout("send transaction"));
            }
        };

        crate::metrics::record_tx_submitted(&self.network);
        crate::metrics::record_tx_latency(&self.network, started.elapsed().as_secs_f64());

        let tx = envelope.user_tx.tx;
        let record = TransactionRecord {
            id: Uuid::new_v4(),
            user_address: tx.from,
            to: tx.to,
            data: tx.data,
            value: tx.value,
            tx_hash,
            gas_price: tx.gas_price,
            gas_limit: tx.gas_limit,
            fee_payer: envelope.fee_payer,
            submitted_at: Utc::now(),
            status: TxStatus::Pending,
        };

        info!(
            "Transaction sent: {:?} (user {:?}, nonce {})",
            tx_hash, record.user_address, nonce
        );

        if let Err(e) = self.store.save_transaction_record(&record).await {
            error!(
                "Reconciliation gap: {:?} is on the network but not stored: {}",
                tx_hash, e
            );
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{FeeData, MockRelayRpc};
    use crate::error::SubmissionError;
    use crate::gas::GasEstimate;
    use crate::state::MemoryStore;
    use crate::tx::auth::tests::{sign, user_request};
    use crate::tx::{AuthorizationValidator, FeeDelegationBuilder};
    use async_trait::async_trait;
    use ethers::core::rand::thread_rng;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::{H256, U256};

    async fn envelope(nonce: u64) -> FeeDelegationEnvelope {
        let user = LocalWallet::new(&mut thread_rng());
        let request = user_request(user.address(), Some(nonce));
        let signature = sign(&user, &request).await;
        let authorized = AuthorizationValidator::new()
            .validate(&request, &signature)
            .unwrap();
        let estimate = GasEstimate::new(
            30_000,
            U256::from(1_000_000_000u64),
            &FeeData::default(),
            U256::from(u64::MAX),
        );
        FeeDelegationBuilder::new(LocalWallet::new(&mut thread_rng()), 100)
            .unwrap()
            .build(&authorized, &estimate, nonce, 1001)
            .unwrap()
    }

    fn submitter(rpc: MockRelayRpc, store: Arc<dyn RelayStore>) -> TransactionSubmitter {
        TransactionSubmitter::new(
            Arc::new(rpc),
            store,
            Arc::new(NonceRegistry::new()),
            "kairos",
            Duration::from_secs(1),
        )
    }

    #[tokio::test]
    async fn accepted_broadcast_yields_pending_record() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(0xab)));
        let store = Arc::new(MemoryStore::new());

        let record = submitter(rpc, store.clone())
            .submit(envelope(0).await)
            .await
            .unwrap();

        assert_eq!(record.tx_hash, H256::repeat_byte(0xab));
        assert_eq!(record.status, TxStatus::Pending);
        assert_eq!(record.gas_limit, 30_000);
        assert!(store.record(record.tx_hash).await.is_some());
    }

    #[tokio::test]
    async fn rejection_is_surfaced_without_retry() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction().times(1).returning(|_| {
            Err(RelayError::Submission(
                SubmissionError::InsufficientFeePayerBalance,
            ))
        });
        let store = Arc::new(MemoryStore::new());

        let err = submitter(rpc, store.clone())
            .submit(envelope(0).await)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RelayError::Submission(SubmissionError::InsufficientFeePayerBalance)
        ));
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn same_nonce_cannot_be_submitted_twice() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction()
            .times(1)
            .returning(|_| Ok(H256::repeat_byte(1)));
        let submitter = submitter(rpc, Arc::new(MemoryStore::new()));

        let first = envelope(9).await;
        let sender = first.sender();
        submitter.submit(first).await.unwrap();

        // Same sender, same nonce, freshly built envelope
        let mut second = envelope(9).await;
        second.user_tx.tx.from = sender;
        let err = submitter.submit(second).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::Submission(SubmissionError::NonceReused { nonce: 9, .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_nonce_claimed() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction()
            .times(1)
            .returning(|_| Err(RelayError::Rpc("connection reset by peer".to_string())));
        let submitter = submitter(rpc, Arc::new(MemoryStore::new()));

        let first = envelope(3).await;
        let sender = first.sender();
        let err = submitter.submit(first).await.unwrap_err();
        assert!(matches!(err, RelayError::Rpc(_)));
        assert!(submitter.nonces.is_claimed(sender, 3));

        let mut retry = envelope(3).await;
        retry.user_tx.tx.from = sender;
        assert!(matches!(
            submitter.submit(retry).await.unwrap_err(),
            RelayError::Submission(SubmissionError::NonceReused { nonce: 3, .. })
        ));
    }

    #[tokio::test]
    async fn refusal_frees_the_nonce() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction().times(1).returning(|_| {
            Err(RelayError::Submission(SubmissionError::Rejected(
                "invalid envelope".to_string(),
            )))
        });
        let submitter = submitter(rpc, Arc::new(MemoryStore::new()));

        let envelope = envelope(3).await;
        let sender = envelope.sender();
        submitter.submit(envelope).await.unwrap_err();
        assert!(!submitter.nonces.is_claimed(sender, 3));
    }

    struct FailingStore;

    #[async_trait]
    impl RelayStore for FailingStore {
        async fn save_transaction_record(&self, _: &TransactionRecord) -> RelayResult<()> {
            Err(RelayError::Storage("disk full".to_string()))
        }

        async fn update_transaction_status(&self, _: H256, _: TxStatus) -> RelayResult<()> {
            Err(RelayError::Storage("disk full".to_string()))
        }

        async fn save_gas_price_sample(&self, _: &crate::gas::GasPriceSample) -> RelayResult<()> {
            Err(RelayError::Storage("disk full".to_string()))
        }

        async fn health_check(&self) -> RelayResult<()> {
            Err(RelayError::Storage("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn storage_failure_does_not_undo_broadcast() {
        let mut rpc = MockRelayRpc::new();
        rpc.expect_send_transaction()
            .returning(|_| Ok(H256::repeat_byte(7)));

        let record = submitter(rpc, Arc::new(FailingStore))
            .submit(envelope(0).await)
            .await
            .unwrap();
        assert_eq!(record.tx_hash, H256::repeat_byte(7));
    }
}
