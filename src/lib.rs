//! Fee Relay - sponsors gas for user transactions
//!
//! [`Relay`] runs one request through authorization, pricing, envelope
//! signing and broadcast. [`BatchCoordinator`] paces many of them. Both hang
//! off a [`RelayContext`], which the binary wires to a node and a store.

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod gas;
pub mod metrics;
pub mod relay;
pub mod state;
pub mod tx;

pub use error::{RelayError, RelayResult};
pub use relay::{BatchCoordinator, BatchResult, Relay, RelayContext};
pub use tx::{TransactionRequest, TransactionTracker};
