//! Gas pricing and gas limit estimation
//!
//! Both halves degrade instead of failing: the oracle falls back to the last
//! bounded sample or the configured floor, the limit estimator falls back to a
//! configured ceiling. Only the inputs (price samples) are cached; a
//! `GasEstimate` is assembled fresh for every request.

mod limit;
mod oracle;

pub use limit::GasLimitEstimator;
pub use oracle::GasPriceOracle;

use crate::chain::FeeData;

use chrono::{DateTime, Utc};
use ethers::types::U256;
use ethers::utils::format_units;
use rust_decimal::Decimal;
use serde::Serialize;
use std::str::FromStr;
use tracing::debug;

/// A bounded network gas price, superseded on refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasPriceSample {
    pub gas_price: U256,
    pub fetched_at: DateTime<Utc>,
    pub network: String,
}

/// Gas parameters for one request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GasEstimate {
    pub gas_limit: u64,
    pub gas_price: U256,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
    /// Worst-case fee in native units (gas_limit * gas_price / 1e18)
    pub estimated_cost: Decimal,
}

impl GasEstimate {
    /// Combine a limit, a bounded price and optional EIP-1559 fields.
    ///
    /// EIP-1559 fields are capped at `max_gas_price`, same as the legacy price.
    pub fn new(gas_limit: u64, gas_price: U256, fee_data: &FeeData, max_gas_price: U256) -> Self {
        let cap = |fee: U256| fee.min(max_gas_price);
        Self {
            gas_limit,
            gas_price,
            max_fee_per_gas: fee_data.max_fee_per_gas.map(cap),
            max_priority_fee_per_gas: fee_data.max_priority_fee_per_gas.map(cap),
            estimated_cost: native_amount(calculate_cost(gas_limit, gas_price)),
        }
    }
}

/// Calculate total cost in wei
pub fn calculate_cost(gas_limit: u64, gas_price: U256) -> U256 {
    U256::from(gas_limit).saturating_mul(gas_price)
}

/// Convert a wei amount into a decimal of the native 18-decimals unit
fn native_amount(wei: U256) -> Decimal {
    format_units(wei, 18u32)
        .ok()
        .and_then(|s| Decimal::from_str(&s).ok())
        .unwrap_or_else(|| {
            debug!("Cost {} does not fit a decimal, reporting zero", wei);
            Decimal::ZERO
        })
}

/// Add `percent` on top of `value`
pub(crate) fn with_buffer(value: U256, percent: u64) -> U256 {
    value.saturating_add(value.saturating_mul(U256::from(percent)) / 100)
}
