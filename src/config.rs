//! Configuration management for the relay
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relay: RelayConfig,
    pub gas: GasConfig,
    pub chain: ChainConfig,
    pub keys: KeysConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Root directory for persisted state (the tx store file lives here).
    pub workdir: PathBuf,
    /// Delete the tx store file at startup.
    pub dev_mode: bool,
    /// Interval between reap/boost sweeps.
    pub sweep_interval_ms: u64,
    /// Mining depth at which an in-flight transaction is pruned.
    pub confirmations_needed: u64,
    /// Blocks without progress before a pending transaction is repriced.
    pub pending_transaction_timeout_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GasConfig {
    /// Gas price multiplier applied per boost. Must be > 1.
    pub retry_gas_price_factor: f64,
    /// Absolute cap on any broadcast gas price, in wei.
    pub max_gas_price_wei: u64,
    /// Safety margin over RPC gas estimation. Must be >= 1.
    pub estimate_gas_factor: f64,
    /// Fallback gas limit when estimation fails.
    pub default_gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
}

/// Names of the environment variables holding the signing keys.
/// The worker variable may hold several comma-separated keys.
#[derive(Debug, Clone, Deserialize)]
pub struct KeysConfig {
    pub manager_key_env: String,
    pub worker_keys_env: String,
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
    /// Load settings from the file named by `METARELAY_CONFIG`, falling back
    /// to `config/default.toml`.
    pub fn load() -> Result<Self> {
        let path =
            env::var("METARELAY_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());
        Self::from_path(Path::new(&path))
    }

    fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let settings: Settings = toml::from_str(&substitute_env_vars(&raw))
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.gas.retry_gas_price_factor <= 1.0 {
            anyhow::bail!("retry_gas_price_factor must be greater than 1");
        }
        if self.gas.estimate_gas_factor < 1.0 {
            anyhow::bail!("estimate_gas_factor must be at least 1");
        }
        if self.gas.max_gas_price_wei == 0 {
            anyhow::bail!("max_gas_price_wei must be non-zero");
        }
        if self.relay.confirmations_needed == 0 {
            anyhow::bail!("confirmations_needed must be at least 1");
        }
        if self.relay.pending_transaction_timeout_blocks == 0 {
            anyhow::bail!("pending_transaction_timeout_blocks must be at least 1");
        }
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be configured");
        }

        Ok(())
    }
}

/// Substitute `${VAR_NAME}` placeholders with values from the environment.
/// Unset variables substitute as the empty string.
fn substitute_env_vars(input: &str) -> String {
    let placeholder = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    placeholder
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_RPC_KEY", "secret");
        let input = "rpc_urls = [\"https://rpc.example.com/${TEST_RPC_KEY}\"]";
        let result = substitute_env_vars(&input);
        assert_eq!(result, "rpc_urls = [\"https://rpc.example.com/secret\"]");
    }

    #[test]
    fn test_load_from_file_substitutes_and_validates() {
        env::set_var("TEST_CHAIN_RPC", "http://127.0.0.1:4444");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            r#"
            [relay]
            workdir = "./workdir"
            dev_mode = true
            sweep_interval_ms = 1000
            confirmations_needed = 12
            pending_transaction_timeout_blocks = 10

            [gas]
            retry_gas_price_factor = 1.25
            max_gas_price_wei = 100000000000
            estimate_gas_factor = 1.1
            default_gas_limit = 500000

            [chain]
            chain_id = 33
            rpc_urls = ["${TEST_CHAIN_RPC}"]

            [keys]
            manager_key_env = "RELAY_MANAGER_KEY"
            worker_keys_env = "RELAY_WORKER_KEYS"

            [api]
            host = "127.0.0.1"
            port = 8090

            [metrics]
            enabled = false
            port = 9090
            "#,
        )
        .unwrap();

        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.chain.rpc_urls, vec!["http://127.0.0.1:4444"]);
        assert!(settings.relay.dev_mode);
    }

    #[test]
    fn test_validation_rejects_bad_factor() {
        let settings = Settings {
            relay: RelayConfig {
                workdir: PathBuf::from("/tmp/relay"),
                dev_mode: false,
                sweep_interval_ms: 5000,
                confirmations_needed: 12,
                pending_transaction_timeout_blocks: 10,
            },
            gas: GasConfig {
                retry_gas_price_factor: 1.0,
                max_gas_price_wei: 100_000_000_000,
                estimate_gas_factor: 1.1,
                default_gas_limit: 500_000,
            },
            chain: ChainConfig {
                chain_id: 33,
                rpc_urls: vec!["http://localhost:4444".to_string()],
            },
            keys: KeysConfig {
                manager_key_env: "RELAY_MANAGER_KEY".to_string(),
                worker_keys_env: "RELAY_WORKER_KEYS".to_string(),
            },
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
            },
            metrics: MetricsConfig {
                enabled: false,
                port: 9090,
            },
        };

        assert!(settings.validate().is_err());
    }
}
