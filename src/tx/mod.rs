//! Sponsored transaction handling: authorization, envelopes, broadcast and tracking

pub mod auth;
mod envelope;
mod nonce;
mod sender;
mod tracker;
mod types;

pub use auth::{authorization_digest, AuthorizationValidator, AuthorizedRequest};
pub use envelope::{
    BaseTransaction, FeeDelegationBuilder, FeeDelegationEnvelope, SignedTransaction,
    TX_TYPE_FEE_DELEGATED_WITH_RATIO,
};
pub use nonce::NonceRegistry;
pub use sender::TransactionSubmitter;
pub use tracker::{TransactionTracker, TxStatusReport};
pub use types::{CallRequest, TransactionRecord, TransactionRequest, TxStatus};
