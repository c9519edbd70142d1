//! Batch relaying
//!
//! Items are relayed in groups: every item of a group runs concurrently,
//! groups run one after another with a short pause in between. One item
//! failing never affects the others.

use super::Relay;
use crate::config::BatchConfig;
use crate::error::{RelayError, RelayResult};
use crate::tx::TransactionRequest;

use ethers::types::{Bytes, H256};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Outcome of one batch item, reported at its input index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub index: usize,
    pub tx_hash: Option<H256>,
    pub error: Option<String>,
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        self.tx_hash.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub items: Vec<BatchItem>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.items.iter().filter(|item| item.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.items.len() - self.succeeded()
    }
}

pub struct BatchCoordinator {
    relay: Arc<Relay>,
    group_size: usize,
    group_delay: Duration,
    /// Caps in-flight relays at `group_size` across concurrent batches
    workers: Arc<Semaphore>,
}

impl BatchCoordinator {
    pub fn new(relay: Arc<Relay>, config: &BatchConfig) -> Self {
        let group_size = config.group_size.max(1);
        Self {
            relay,
            group_size,
            group_delay: Duration::from_millis(config.group_delay_ms),
            workers: Arc::new(Semaphore::new(group_size)),
        }
    }

    /// Relay each `(request, signature)` pair.
    ///
    /// Requests from the same user should carry explicit, consecutive nonces;
    /// items of one group are not ordered against each other.
    pub async fn submit_batch(
        &self,
        requests: Vec<TransactionRequest>,
        signatures: Vec<Bytes>,
    ) -> RelayResult<BatchResult> {
        if requests.len() != signatures.len() {
            return Err(RelayError::BatchLengthMismatch {
                requests: requests.len(),
                signatures: signatures.len(),
            });
        }

        let total = requests.len();
        crate::metrics::record_batch_size(total);
        info!("Relaying batch of {} in groups of {}", total, self.group_size);

        let mut slots: Vec<Option<BatchItem>> = vec![None; total];
        let mut pairs = requests.into_iter().zip(signatures).enumerate().peekable();

        while pairs.peek().is_some() {
            let handles: Vec<_> = pairs
                .by_ref()
                .take(self.group_size)
                .map(|(index, (request, signature))| {
                    let relay = self.relay.clone();
                    let workers = self.workers.clone();
                    let handle = tokio::spawn(async move {
                        let _permit = workers
                            .acquire_owned()
                            .await
                            .map_err(|e| RelayError::Internal(e.to_string()))?;
                        relay.relay(request, signature.as_ref()).await
                    });
                    (index, handle)
                })
                .collect();

            for (index, handle) in handles {
                let item = match handle.await {
                    Ok(Ok(record)) => BatchItem {
                        index,
                        tx_hash: Some(record.tx_hash),
                        error: None,
                    },
                    Ok(Err(e)) => {
                        debug!("Batch item {} failed: {}", index, e);
                        BatchItem {
                            index,
                            tx_hash: None,
                            error: Some(e.to_string()),
                        }
                    }
                    Err(e) => {
                        warn!("Batch item {} task aborted: {}", index, e);
                        BatchItem {
                            index,
                            tx_hash: None,
                            error: Some(format!("task aborted: {}", e)),
                        }
                    }
                };
                slots[index] = Some(item);
            }

            if pairs.peek().is_some() {
                tokio::time::sleep(self.group_delay).await;
            }
        }

        let items = slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| BatchItem {
                    index,
                    tx_hash: None,
                    error: Some("not processed".to_string()),
                })
            })
            .collect();
        let result = BatchResult { items };
        info!(
            "Batch finished: {} succeeded, {} failed",
            result.succeeded(),
            result.failed()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::tests::{priced_rpc, relay, settings};
    use crate::state::MemoryStore;
    use crate::tx::auth::tests::{sign, user_request};
    use ethers::core::rand::thread_rng;
    use ethers::signers::{LocalWallet, Signer};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn coordinator(relay: Relay) -> BatchCoordinator {
        BatchCoordinator::new(Arc::new(relay), &settings().batch)
    }

    #[tokio::test]
    async fn one_bad_signature_does_not_sink_the_batch() {
        let mut rpc = priced_rpc();
        rpc.expect_send_transaction()
            .times(6)
            .returning(|envelope| Ok(H256::from_low_u64_be(envelope.nonce() + 1)));
        let store = Arc::new(MemoryStore::new());
        let coordinator = coordinator(relay(rpc, store.clone()));

        let user = LocalWallet::new(&mut thread_rng());
        let stranger = LocalWallet::new(&mut thread_rng());
        let mut requests = Vec::new();
        let mut signatures = Vec::new();
        for nonce in 0..7u64 {
            let request = user_request(user.address(), Some(nonce));
            let signer = if nonce == 2 { &stranger } else { &user };
            signatures.push(Bytes::from(sign(signer, &request).await));
            requests.push(request);
        }

        let result = coordinator.submit_batch(requests, signatures).await.unwrap();

        assert_eq!(result.items.len(), 7);
        assert_eq!(result.succeeded(), 6);
        for (position, item) in result.items.iter().enumerate() {
            assert_eq!(item.index, position);
            if position == 2 {
                assert!(item.tx_hash.is_none());
                assert!(item.error.is_some());
            } else {
                assert_eq!(item.tx_hash, Some(H256::from_low_u64_be(position as u64 + 1)));
            }
        }
        assert_eq!(store.record_count().await, 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn in_flight_relays_never_exceed_group_size() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut rpc = priced_rpc();
        rpc.expect_send_transaction().times(12).returning({
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            move |envelope| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                // Later nonces finish first
                std::thread::sleep(Duration::from_millis(10 * (12 - envelope.nonce())));
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(H256::from_low_u64_be(envelope.nonce() + 1))
            }
        });
        let coordinator = coordinator(relay(rpc, Arc::new(MemoryStore::new())));

        let user = LocalWallet::new(&mut thread_rng());
        let mut requests = Vec::new();
        let mut signatures = Vec::new();
        for nonce in 0..12u64 {
            let request = user_request(user.address(), Some(nonce));
            signatures.push(Bytes::from(sign(&user, &request).await));
            requests.push(request);
        }

        let result = coordinator.submit_batch(requests, signatures).await.unwrap();

        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert_eq!(result.succeeded(), 12);
        for (position, item) in result.items.iter().enumerate() {
            assert_eq!(item.index, position);
            assert_eq!(item.tx_hash, Some(H256::from_low_u64_be(position as u64 + 1)));
        }
    }

    #[tokio::test]
    async fn length_mismatch_is_rejected_before_submission() {
        let mut rpc = priced_rpc();
        rpc.expect_send_transaction().never();
        let coordinator = coordinator(relay(rpc, Arc::new(MemoryStore::new())));

        let user = LocalWallet::new(&mut thread_rng());
        let requests = vec![
            user_request(user.address(), Some(0)),
            user_request(user.address(), Some(1)),
        ];
        let signatures = vec![Bytes::from(sign(&user, &requests[0]).await)];

        let err = coordinator
            .submit_batch(requests, signatures)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::BatchLengthMismatch {
                requests: 2,
                signatures: 1
            }
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_empty_result() {
        let coordinator = coordinator(relay(priced_rpc(), Arc::new(MemoryStore::new())));
        let result = coordinator.submit_batch(Vec::new(), Vec::new()).await.unwrap();
        assert!(result.items.is_empty());
    }
}
