//! Request and record types shared by the relay pipeline

use crate::error::{RelayError, RelayResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A user transaction the fee payer is asked to sponsor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub to: Address,
    #[serde(default)]
    pub data: Bytes,
    #[serde(default)]
    pub value: Option<U256>,
    #[serde(default)]
    pub gas_limit: Option<u64>,
    pub user_address: Address,
    #[serde(default)]
    pub nonce: Option<u64>,
}

impl TransactionRequest {
    /// Copy of this request pinned to a concrete nonce
    pub fn with_nonce(&self, nonce: u64) -> Self {
        Self {
            nonce: Some(nonce),
            ..self.clone()
        }
    }

    pub fn value_or_zero(&self) -> U256 {
        self.value.unwrap_or_default()
    }

    /// The call handed to gas simulation
    pub fn call(&self) -> CallRequest {
        CallRequest {
            from: Some(self.user_address),
            to: self.to,
            data: self.data.clone(),
            value: self.value_or_zero(),
        }
    }
}

/// Input to gas simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub from: Option<Address>,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
}

/// Lifecycle of a relayed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxStatus::Pending)
    }

    /// Status only moves forward: pending -> success | failed
    pub fn can_transition_to(&self, next: TxStatus) -> bool {
        matches!(
            (self, next),
            (TxStatus::Pending, TxStatus::Success) | (TxStatus::Pending, TxStatus::Failed)
        )
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A broadcast transaction, as handed to persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: Uuid,
    pub user_address: Address,
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub tx_hash: H256,
    pub gas_price: U256,
    pub gas_limit: u64,
    pub fee_payer: Address,
    pub submitted_at: DateTime<Utc>,
    pub status: TxStatus,
}

impl TransactionRecord {
    /// Advance the status; backwards or repeated moves are rejected
    pub fn transition(&mut self, next: TxStatus) -> RelayResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RelayError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
