//! Cached, bounded network gas price

use super::{with_buffer, GasPriceSample};
use crate::chain::RelayRpc;
use crate::config::GasConfig;
use crate::error::{RelayError, RelayResult};
use crate::state::RelayStore;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use ethers::types::U256;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Gas price oracle with a single cached sample.
///
/// Readers load the cached sample lock-free; a refresh swaps in a whole new
/// sample. The mutex only decides who performs the refresh, so concurrent
/// misses trigger one network fetch whether it succeeds or fails.
pub struct GasPriceOracle {
    rpc: Arc<dyn RelayRpc>,
    store: Arc<dyn RelayStore>,
    config: GasConfig,
    network: String,
    rpc_timeout: Duration,
    cached: ArcSwapOption<GasPriceSample>,
    refresh_guard: Mutex<()>,
    /// Completed refresh attempts, successful or not
    attempts: AtomicU64,
}

impl GasPriceOracle {
    pub fn new(
        rpc: Arc<dyn RelayRpc>,
        store: Arc<dyn RelayStore>,
        config: GasConfig,
        network: impl Into<String>,
        rpc_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            store,
            config,
            network: network.into(),
            rpc_timeout,
            cached: ArcSwapOption::empty(),
            refresh_guard: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    pub fn min_gas_price(&self) -> U256 {
        U256::from(self.config.min_gas_price_wei)
    }

    pub fn max_gas_price(&self) -> U256 {
        U256::from(self.config.max_gas_price_wei)
    }

    /// Current bounded gas price. Never fails; degrades to the last unexpired
    /// sample, then to the configured floor.
    pub async fn current(&self) -> GasPriceSample {
        if let Some(sample) = self.fresh_sample() {
            return sample;
        }

        let seen = self.attempts.load(Ordering::Acquire);
        let _guard = match self.refresh_guard.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                // Someone else is refreshing; a stale-but-valid sample will do
                if let Some(sample) = self.unexpired_sample() {
                    return sample;
                }
                let guard = self.refresh_guard.lock().await;
                if self.attempts.load(Ordering::Acquire) != seen {
                    // The refresh we waited on is done; take its outcome
                    return self
                        .unexpired_sample()
                        .unwrap_or_else(|| self.floor_sample());
                }
                guard
            }
        };

        let fetched = self.fetch().await;
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match fetched {
            Ok(sample) => {
                self.cached.store(Some(Arc::new(sample.clone())));
                self.persist(sample.clone());
                crate::metrics::record_gas_price(&self.network, sample.gas_price);
                sample
            }
            Err(e) => {
                warn!("Gas price fetch failed on {}: {}", self.network, e);
                crate::metrics::record_gas_price_fallback(&self.network);
                self.unexpired_sample()
                    .unwrap_or_else(|| self.floor_sample())
            }
        }
    }

    /// Apply the price buffer and clamp to the configured bounds
    pub fn bound(&self, raw: U256) -> U256 {
        let buffered = with_buffer(raw, self.config.price_buffer_percent);
        buffered.max(self.min_gas_price()).min(self.max_gas_price())
    }

    async fn fetch(&self) -> RelayResult<GasPriceSample> {
        let raw = timeout(self.rpc_timeout, self.rpc.get_gas_price())
            .await
            .map_err(|_| RelayError::timeout("gas price fetch"))??;

        let gas_price = self.bound(raw);
        debug!(
            "Gas price on {}: raw {} -> bounded {}",
            self.network, raw, gas_price
        );

        Ok(GasPriceSample {
            gas_price,
            fetched_at: Utc::now(),
            network: self.network.clone(),
        })
    }

    fn fresh_sample(&self) -> Option<GasPriceSample> {
        self.cached_within(self.config.price_freshness_secs)
    }

    fn unexpired_sample(&self) -> Option<GasPriceSample> {
        self.cached_within(self.config.price_expiry_secs)
    }

    fn cached_within(&self, secs: u64) -> Option<GasPriceSample> {
        let sample = self.cached.load_full()?;
        let window = chrono::Duration::from_std(Duration::from_secs(secs)).ok()?;
        let age = Utc::now().signed_duration_since(sample.fetched_at);
        (age < window).then(|| (*sample).clone())
    }

    fn floor_sample(&self) -> GasPriceSample {
        GasPriceSample {
            gas_price: self.min_gas_price(),
            fetched_at: Utc::now(),
            network: self.network.clone(),
        }
    }

    /// Record the sample for analytics without waiting on it
    fn persist(&self, sample: GasPriceSample) {
        let store = self.store.clone();
        tokio::spawn(async move {
            if let Err(e) = store.save_gas_price_sample(&sample).await {
                debug!("Failed to record gas price sample: {}", e);
            }
        });
    }
}
