//! Error types for the fee relay

use thiserror::Error;

/// Main error type for the relay
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Gas estimation error: {0}")]
    Estimation(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Batch rejected: {requests} requests but {signatures} signatures")]
    BatchLengthMismatch { requests: usize, signatures: usize },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// The user's authorization did not check out
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("nonce mismatch: authorized {authorized:?}, building with {requested}")]
    NonceMismatch {
        authorized: Option<u64>,
        requested: u64,
    },
}

/// Broadcast was refused, or never attempted
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("nonce {nonce} already used for sender {sender}")]
    NonceReused { sender: String, nonce: u64 },

    #[error("nonce conflict: {0}")]
    NonceConflict(String),

    #[error("fee payer has insufficient balance")]
    InsufficientFeePayerBalance,

    #[error("rejected by node: {0}")]
    Rejected(String),
}

impl SubmissionError {
    /// Map a node rejection message onto a submission error
    pub fn from_node_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("nonce too low") || lower.contains("nonce too high") {
            SubmissionError::NonceConflict(message.to_string())
        } else if lower.contains("insufficient funds") || lower.contains("insufficient balance") {
            SubmissionError::InsufficientFeePayerBalance
        } else {
            SubmissionError::Rejected(message.to_string())
        }
    }
}

impl RelayError {
    pub fn timeout(operation: impl Into<String>) -> Self {
        RelayError::Timeout {
            operation: operation.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, RelayError::Rpc(_) | RelayError::Timeout { .. })
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            RelayError::Signing(_)
                | RelayError::Config(_)
                | RelayError::Submission(SubmissionError::InsufficientFeePayerBalance)
        )
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Config(_) => "config",
            RelayError::Database(_) => "database",
            RelayError::Storage(_) => "storage",
            RelayError::Rpc(_) => "rpc",
            RelayError::Auth(_) => "auth",
            RelayError::Submission(_) => "submission",
            RelayError::Estimation(_) => "estimation",
            RelayError::Signing(_) => "signing",
            RelayError::Timeout { .. } => "timeout",
            RelayError::BatchLengthMismatch { .. } => "batch_length",
            RelayError::InvalidStateTransition { .. } => "state_transition",
            RelayError::Internal(_) => "internal",
        }
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
