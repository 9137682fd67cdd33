//! Configuration management for the wallet core
//!
//! Loads configuration from TOML files with environment variable substitution.
//! All structs are immutable once loaded; components receive clones at
//! construction time and never share mutable configuration.

use crate::error::{WalletError, WalletResult};

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Minimum relay fee (in satoshi-equivalent units) a typical transaction
/// must pay to be accepted by the UTXO network.
pub const UTXO_MIN_RELAY_FEE: u64 = 90_400;

/// Byte size of the reference single-input/single-output transaction the
/// minimum relay fee is quoted against.
pub const UTXO_REFERENCE_TX_BYTES: u64 = 225;

/// Default UTXO fee rate in units per byte: the minimum relay fee divided
/// by the reference transaction size, rounded up (402).
pub const DEFAULT_UTXO_FEE_RATE: u64 =
    (UTXO_MIN_RELAY_FEE + UTXO_REFERENCE_TX_BYTES - 1) / UTXO_REFERENCE_TX_BYTES;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub account_chain: AccountChainConfig,
    /// Destination chain of the burn/mint bridge
    pub destination_chain: AccountChainConfig,
    pub utxo_chain: UtxoChainConfig,
    pub bridge: BridgeConfig,
    pub tracker: TrackerConfig,
}

/// Account-based chain (balances, nonces, contract calls)
#[derive(Debug, Clone, Deserialize)]
pub struct AccountChainConfig {
    /// Short chain tag used in bridge payloads, e.g. "ETH"
    pub name: String,
    pub chain_id: u64,
    /// Blocks on top of inclusion before a receipt is considered final
    pub confirmation_blocks: u64,
    /// Receipt/new-head polling cadence
    pub poll_interval_ms: u64,
    /// Contract addresses by well-known name ("metToken", "auctions",
    /// "converter", "tokenPorter")
    pub contracts: HashMap<String, String>,
}

/// UTXO-based chain (unspent outputs, fee-rate-driven sizing)
#[derive(Debug, Clone, Deserialize)]
pub struct UtxoChainConfig {
    pub name: String,
    /// Fee rate override in units per byte; defaults to
    /// [`DEFAULT_UTXO_FEE_RATE`] when absent
    pub fee_rate: Option<u64>,
    /// Outputs below this value are folded into the fee instead of
    /// producing change
    pub dust_threshold: u64,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Chain tag stamped into export payloads as the origin
    pub origin_chain: String,
    /// Seconds per auction tick on the destination chain
    pub auction_tick_secs: u64,
    /// Buffer applied on top of estimated gas, in percent
    pub gas_limit_buffer_percent: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Capacity of the core event broadcast channel
    pub event_channel_capacity: usize,
}

impl Settings {
    /// Load settings from the configuration file named by
    /// `MET_WALLET_CONFIG`, falling back to `config/default.toml`.
    pub fn load() -> Result<Self> {
        let config_path = env::var("MET_WALLET_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path.
    pub fn load_from(config_path: &PathBuf) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config_str = substitute_env_vars(&config_str);

        let settings: Settings = toml::from_str(&config_str)
            .with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        for chain in [&self.account_chain, &self.destination_chain] {
            if chain.name.is_empty() || chain.name.len() > 8 {
                anyhow::bail!("Chain name must be 1-8 bytes for bridge payloads");
            }
            for name in ["metToken", "auctions", "converter", "tokenPorter"] {
                if !chain.contracts.contains_key(name) {
                    anyhow::bail!("Missing contract address for {} on {}", name, chain.name);
                }
            }
        }
        if self.bridge.origin_chain.len() > 8 {
            anyhow::bail!("Bridge origin chain tag must fit in 8 bytes");
        }

        if self.bridge.auction_tick_secs == 0 {
            anyhow::bail!("auction_tick_secs must be non-zero");
        }

        Ok(())
    }

    /// Effective UTXO fee rate (configured override or the relay-fee default)
    pub fn utxo_fee_rate(&self) -> u64 {
        self.utxo_chain.fee_rate.unwrap_or(DEFAULT_UTXO_FEE_RATE)
    }
}

/// Contract addresses by well-known name, parsed once at construction.
#[derive(Debug, Clone)]
pub struct ContractRegistry {
    by_name: HashMap<String, Address>,
}

impl ContractRegistry {
    pub fn from_config(contracts: &HashMap<String, String>) -> WalletResult<Self> {
        let mut by_name = HashMap::new();
        for (name, raw) in contracts {
            let address = Address::from_str(raw).map_err(|e| {
                WalletError::Config(format!("invalid address for contract {}: {}", name, e))
            })?;
            by_name.insert(name.clone(), address);
        }
        Ok(Self { by_name })
    }

    pub fn get(&self, name: &str) -> WalletResult<Address> {
        self.by_name.get(name).copied().ok_or_else(|| {
            WalletError::Config(format!("no address configured for contract {}", name))
        })
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
