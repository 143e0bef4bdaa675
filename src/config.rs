//! Configuration module for the composition engine
//!
//! This module handles configuration loading from TOML files and
//! environment variables (optionally from a `.env` file).

use crate::composer::{BudgetLimits, ComposeError, MAX_COMPUTE_UNITS, MAX_TX_BYTES};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::{CommitmentConfig, CommitmentLevel};
use std::path::Path;

pub const ENV_RPC_URL: &str = "TXCOMPOSE_RPC_URL";
pub const ENV_MAX_TX_BYTES: &str = "TXCOMPOSE_MAX_TX_BYTES";
pub const ENV_MAX_COMPUTE_UNITS: &str = "TXCOMPOSE_MAX_COMPUTE_UNITS";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Size and compute ceilings
    #[serde(default)]
    pub budget: BudgetConfig,

    /// Lookup table fetching
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Transaction size limit in bytes; clamped to the 1232-byte ceiling
    #[serde(default = "default_max_tx_bytes")]
    pub max_tx_bytes: u64,

    /// Compute unit limit; clamped to the 1.4M ceiling
    #[serde(default = "default_max_compute_units")]
    pub max_compute_units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcConfig {
    /// JSON-RPC endpoint used to read lookup tables
    #[serde(default = "default_rpc_url")]
    pub url: String,

    /// processed | confirmed | finalized
    #[serde(default = "default_commitment")]
    pub commitment: String,

    /// Request timeout in milliseconds
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,

    /// Retries per table fetch after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_max_tx_bytes() -> u64 { MAX_TX_BYTES }
fn default_max_compute_units() -> u64 { MAX_COMPUTE_UNITS }
fn default_rpc_url() -> String { "https://api.mainnet-beta.solana.com".to_string() }
fn default_commitment() -> String { "confirmed".to_string() }
fn default_rpc_timeout_ms() -> u64 { 30_000 }
fn default_max_retries() -> usize { 3 }
fn default_retry_base_delay_ms() -> u64 { 50 }
fn default_retry_max_delay_ms() -> u64 { 2_000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_tx_bytes: default_max_tx_bytes(),
            max_compute_units: default_max_compute_units(),
        }
    }
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            url: default_rpc_url(),
            commitment: default_commitment(),
            timeout_ms: default_rpc_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
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

impl BudgetConfig {
    /// Effective limits; values above the hard ceilings are clamped
    pub fn limits(&self) -> BudgetLimits {
        BudgetLimits::new(self.max_tx_bytes, self.max_compute_units)
    }
}

impl RpcConfig {
    pub fn commitment_config(&self) -> Result<CommitmentConfig, ComposeError> {
        let commitment = match self.commitment.to_ascii_lowercase().as_str() {
            "processed" => CommitmentLevel::Processed,
            "confirmed" => CommitmentLevel::Confirmed,
            "finalized" => CommitmentLevel::Finalized,
            other => {
                return Err(ComposeError::config(format!(
                    "unknown commitment level '{other}'"
                )))
            }
        };
        Ok(CommitmentConfig { commitment })
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::from_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment variable overrides
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_RPC_URL) {
            self.rpc.url = url;
        }
        if let Some(raw) = lookup(ENV_MAX_TX_BYTES) {
            self.budget.max_tx_bytes = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_TX_BYTES} is not a number: {raw}"))?;
        }
        if let Some(raw) = lookup(ENV_MAX_COMPUTE_UNITS) {
            self.budget.max_compute_units = raw
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_COMPUTE_UNITS} is not a number: {raw}"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.budget.max_tx_bytes == 0 {
            anyhow::bail!("budget.max_tx_bytes must be positive");
        }
        if self.rpc.url.trim().is_empty() {
            anyhow::bail!("rpc.url must not be empty");
        }
        self.rpc.commitment_config()?;
        Ok(())
    }
}
