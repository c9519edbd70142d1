//! Configuration management for the fee relay
//!
//! Loads configuration from TOML files with environment variable substitution.
//! The fee-payer private key is never part of the file; only the name of the
//! environment variable holding it is.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Longest gas price freshness or expiry window accepted (one day)
pub const MAX_PRICE_WINDOW_SECS: u64 = 86_400;

/// Largest chain id whose `chain_id * 2 + 36` still fits a u64
pub const MAX_CHAIN_ID: u64 = (u64::MAX - 36) / 2;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    pub chain: ChainConfig,
    pub gas: GasConfig,
    pub batch: BatchConfig,
    pub fee_payer: FeePayerConfig,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Upper bound for every single RPC call
    pub rpc_timeout_ms: u64,
    pub health_check_interval_secs: u64,
}

impl RelayerConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    /// Network label carried on gas price samples and metrics
    pub network: String,
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// JSON-RPC method accepting a raw fee-delegated transaction
    #[serde(default = "default_send_raw_method")]
    pub send_raw_method: String,
}

fn default_send_raw_method() -> String {
    "klay_sendRawTransaction".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    pub min_gas_price_wei: u64,
    pub max_gas_price_wei: u64,
    /// Added on top of the raw network price (10 = x1.10)
    pub price_buffer_percent: u64,
    /// Added on top of the simulated gas usage (20 = +20%)
    pub limit_buffer_percent: u64,
    pub min_gas_limit: u64,
    /// Used whenever simulation fails
    pub fallback_gas_limit: u64,
    pub price_freshness_secs: u64,
    pub price_expiry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    pub group_size: usize,
    pub group_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeePayerConfig {
    /// Name of the environment variable holding the fee-payer key
    pub private_key_env: String,
    /// Share of the fee covered by the fee payer, 0-100
    pub fee_ratio: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `FEE_RELAY_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("FEE_RELAY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("Chain {} has no RPC URLs configured", self.chain.network);
        }

        if self.gas.min_gas_price_wei > self.gas.max_gas_price_wei {
            anyhow::bail!(
                "min_gas_price_wei ({}) exceeds max_gas_price_wei ({})",
                self.gas.min_gas_price_wei,
                self.gas.max_gas_price_wei
            );
        }

        if self.gas.price_expiry_secs > MAX_PRICE_WINDOW_SECS {
            anyhow::bail!(
                "price_expiry_secs must not exceed {} seconds",
                MAX_PRICE_WINDOW_SECS
            );
        }

        if self.chain.chain_id > MAX_CHAIN_ID {
            anyhow::bail!(
                "chain_id {} too large for an EIP-155 recovery id",
                self.chain.chain_id
            );
        }

        if self.gas.price_freshness_secs > self.gas.price_expiry_secs {
            anyhow::bail!("price_freshness_secs must not exceed price_expiry_secs");
        }

        if self.gas.fallback_gas_limit < self.gas.min_gas_limit {
            tracing::warn!(
                "fallback_gas_limit {} is below min_gas_limit {}, floor will apply",
                self.gas.fallback_gas_limit,
                self.gas.min_gas_limit
            );
        }

        if self.batch.group_size == 0 {
            anyhow::bail!("batch.group_size must be at least 1");
        }

        if self.fee_payer.fee_ratio > 100 {
            anyhow::bail!("fee_payer.fee_ratio must be within 0..=100");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[relayer]
instance_id = "relay-1"
rpc_timeout_ms = 5000
health_check_interval_secs = 30

[chain]
network = "${FEE_RELAY_TEST_NETWORK}"
chain_id = 1001
rpc_urls = ["https://public-en-kairos.node.kaia.io"]

[gas]
min_gas_price_wei = 1000000000
max_gas_price_wei = 500000000000
price_buffer_percent = 10
limit_buffer_percent = 20
min_gas_limit = 21000
fallback_gas_limit = 100000
price_freshness_secs = 30
price_expiry_secs = 60

[batch]
group_size = 5
group_delay_ms = 100

[fee_payer]
private_key_env = "FEE_PAYER_PRIVATE_KEY"
fee_ratio = 100

[api]
host = "0.0.0.0"
port = 8080

[metrics]
enabled = false
port = 9090
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn loads_file_with_substitution() {
        env::set_var("FEE_RELAY_TEST_NETWORK", "kairos");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.chain.network, "kairos");
        assert_eq!(settings.chain.send_raw_method, "klay_sendRawTransaction");
        assert_eq!(settings.batch.group_size, 5);
        assert!(settings.database.is_none());
        assert_eq!(settings.relayer.rpc_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_inverted_gas_bounds() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.gas.min_gas_price_wei = settings.gas.max_gas_price_wei + 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_fee_ratio_over_100() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.fee_payer.fee_ratio = 101;
        assert!(settings.validate().is_err());

        settings.fee_payer.fee_ratio = 100;
        settings.batch.group_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn rejects_unbounded_windows_and_chain_ids() {
        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.gas.price_expiry_secs = u64::MAX;
        assert!(settings.validate().is_err());

        let mut settings: Settings = toml::from_str(SAMPLE).unwrap();
        settings.chain.chain_id = u64::MAX;
        assert!(settings.validate().is_err());

        settings.chain.chain_id = MAX_CHAIN_ID;
        assert!(settings.validate().is_ok());
    }
}
