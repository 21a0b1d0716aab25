//! Configuration module for the escrow client
//!
//! This module handles configuration loading from TOML files and
//! environment variables, and provides structured configuration types.

use crate::chain::{BatchConfig, RetryPolicy};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing configuration values: {}", .0.join(", "))]
    Missing(Vec<String>),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub network: NetworkConfig,

    pub contracts: ContractsConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,

    /// Chain the contracts are deployed on
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractsConfig {
    pub factory: Address,

    /// Deposit stablecoin (6 decimals)
    pub stablecoin: Address,

    pub lending_pool: Address,

    /// Interest-bearing receipt token held by active vaults
    #[serde(default)]
    pub yield_token: Option<Address>,

    /// Vaults expose monthlyRent/totalRentPaid/currentMonthIndex
    #[serde(default)]
    pub rent_bearing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_max_retries() -> u32 { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_batch_size() -> usize { 5 }
fn default_batch_delay_ms() -> u64 { 100 }
fn default_cache_ttl_secs() -> u64 { 300 }
fn default_log_level() -> String { "escrow_client=info,warn".to_string() }

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl ScanConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.base_delay_ms)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            batch_size: self.batch_size,
            delay_ms: self.batch_delay_ms,
        }
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// Environment variables read by [`AppConfig::from_env`]
pub const ENV_RPC_URL: &str = "ESCROW_RPC_URL";
pub const ENV_CHAIN_ID: &str = "ESCROW_CHAIN_ID";
pub const ENV_FACTORY: &str = "ESCROW_FACTORY_ADDRESS";
pub const ENV_STABLECOIN: &str = "ESCROW_STABLECOIN_ADDRESS";
pub const ENV_POOL: &str = "ESCROW_POOL_ADDRESS";
pub const ENV_YIELD_TOKEN: &str = "ESCROW_YIELD_TOKEN_ADDRESS";
pub const ENV_RENT_BEARING: &str = "ESCROW_RENT_BEARING";

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file {}: {}", path, e)))?;

        let config: AppConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, reading `.env` first.
    ///
    /// Every missing or malformed required variable is reported at once.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut missing = Vec::new();

        let mut required = |key: &str| -> Option<String> {
            match lookup(key).filter(|v| !v.trim().is_empty()) {
                Some(v) => Some(v.trim().to_string()),
                None => {
                    missing.push(key.to_string());
                    None
                }
            }
        };

        let rpc_url = required(ENV_RPC_URL);
        let chain_id = required(ENV_CHAIN_ID);
        let factory = required(ENV_FACTORY);
        let stablecoin = required(ENV_STABLECOIN);
        let pool = required(ENV_POOL);

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        // All required values are present past this point
        let (Some(rpc_url), Some(chain_id), Some(factory), Some(stablecoin), Some(pool)) =
            (rpc_url, chain_id, factory, stablecoin, pool)
        else {
            return Err(ConfigError::ValidationError("incomplete environment".to_string()));
        };

        let yield_token = match lookup(ENV_YIELD_TOKEN).filter(|v| !v.trim().is_empty()) {
            Some(v) => Some(parse_address(ENV_YIELD_TOKEN, &v)?),
            None => None,
        };

        let config = Self {
            network: NetworkConfig {
                rpc_url,
                chain_id: chain_id.parse().map_err(|_| {
                    ConfigError::ValidationError(format!("{ENV_CHAIN_ID} is not a number: {chain_id}"))
                })?,
            },
            contracts: ContractsConfig {
                factory: parse_address(ENV_FACTORY, &factory)?,
                stablecoin: parse_address(ENV_STABLECOIN, &stablecoin)?,
                lending_pool: parse_address(ENV_POOL, &pool)?,
                yield_token,
                rent_bearing: lookup(ENV_RENT_BEARING)
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(false),
            },
            scan: ScanConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = &self.network.rpc_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::ValidationError(format!("Invalid RPC URL format: {}", url)));
        }

        if self.network.chain_id == 0 {
            return Err(ConfigError::ValidationError("chain_id must be > 0".to_string()));
        }

        let mut zero = Vec::new();
        if self.contracts.factory.is_zero() {
            zero.push("contracts.factory".to_string());
        }
        if self.contracts.stablecoin.is_zero() {
            zero.push("contracts.stablecoin".to_string());
        }
        if self.contracts.lending_pool.is_zero() {
            zero.push("contracts.lending_pool".to_string());
        }
        if !zero.is_empty() {
            return Err(ConfigError::Missing(zero));
        }

        if self.scan.batch_size == 0 {
            return Err(ConfigError::ValidationError("scan.batch_size must be > 0".to_string()));
        }
        if self.scan.max_retries == 0 {
            return Err(ConfigError::ValidationError("scan.max_retries must be > 0".to_string()));
        }

        Ok(())
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, ConfigError> {
    Address::from_str(value)
        .map_err(|e| ConfigError::ValidationError(format!("{key} is not an address ({value}): {e}")))
}
