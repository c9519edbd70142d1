//! Nonce bookkeeping for sponsored transactions
//!
//! Handles:
//! - Claiming `(sender, nonce)` pairs so no nonce is enveloped twice
//! - Releasing claims when a broadcast is refused
//! - Pruning claims the chain has already consumed

use crate::error::SubmissionError;

use dashmap::DashMap;
use ethers::types::Address;
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Claimed nonces per sender
#[derive(Default)]
pub struct NonceRegistry {
    claimed: DashMap<Address, BTreeSet<u64>>,
}

impl NonceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a nonce for a sender, failing if it is already in use
    pub fn claim(&self, sender: Address, nonce: u64) -> Result<(), SubmissionError> {
        let mut claimed = self.claimed.entry(sender).or_default();
        if !claimed.insert(nonce) {
            warn!("Nonce {} reused for sender {:?}", nonce, sender);
            return Err(SubmissionError::NonceReused {
                sender: format!("{:?}", sender),
                nonce,
            });
        }
        debug!("Claimed nonce {} for {:?}", nonce, sender);
        Ok(())
    }

    /// Release a nonce (broadcast refused, can be reused)
    pub fn release(&self, sender: Address, nonce: u64) {
        if let Some(mut claimed) = self.claimed.get_mut(&sender) {
            claimed.remove(&nonce);
        }
        self.claimed.remove_if(&sender, |_, claimed| claimed.is_empty());
    }

    /// Drop claims below the sender's on-chain nonce
    pub fn prune(&self, sender: Address, on_chain_nonce: u64) {
        if let Some(mut claimed) = self.claimed.get_mut(&sender) {
            let kept = claimed.split_off(&on_chain_nonce);
            *claimed = kept;
        }
        self.claimed.remove_if(&sender, |_, claimed| claimed.is_empty());
    }

    pub fn is_claimed(&self, sender: Address, nonce: u64) -> bool {
        self.claimed
            .get(&sender)
            .map(|claimed| claimed.contains(&nonce))
            .unwrap_or(false)
    }

    /// Get pending count for a sender
    pub fn pending_count(&self, sender: Address) -> usize {
        self.claimed.get(&sender).map(|c| c.len()).unwrap_or(0)
    }
}
