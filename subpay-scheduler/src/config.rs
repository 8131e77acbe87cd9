//! Scheduler service configuration.
//!
//! Loads configuration from a TOML file with support for environment variable
//! expansion in string values. Variables use `$VAR` or `${VAR}` syntax.
//!
//! # Example Configuration
//!
//! ```toml
//! port = 4022
//!
//! [chain]
//! rpc_url = "$ARBITRUM_SEPOLIA_RPC"
//!
//! [account]
//! owner_private_key = "$OWNER_PRIVATE_KEY"
//! address = "0x…"
//!
//! [contract]
//! address = "$SUBSCRIPTION_CONTRACT_ADDRESS"
//!
//! [engine.sponsorship]
//! token = "0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"
//! sponsor = "0x31BE08D380A21fc740883c0BC434FcFc88740b58"
//!
//! [[subscriptions]]
//! amount = "10000"
//! interval_seconds = 86400
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to configuration file (default: `config.toml`)
//! - `HOST` - Override status server bind address
//! - `PORT` - Override status server port
//! - Secrets referenced by `$VAR` in the config file

use std::net::IpAddr;
use std::path::Path;

use alloy_primitives::{Address, Bytes, U256};
use serde::{Deserialize, Serialize};
use subpay::config::EngineConfig;
use subpay_evm::bundler::FeeTier;
use subpay_evm::calls::PaymentEntry;
use subpay_evm::networks::{ARBITRUM_SEPOLIA, ENTRY_POINT_V07, PIMLICO_ARBITRUM_SEPOLIA};
use subpay_evm::trigger::DEFAULT_MAX_BLOCK_RANGE;

/// Top-level scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Status server bind address (default: `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Status server port (default: `4022`).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Node and bundler endpoints.
    pub chain: ChainConfig,

    /// The paying smart account.
    pub account: AccountConfig,

    /// The subscription contract payments call into.
    pub contract: ContractConfig,

    /// On-chain trigger listener.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Engine timing, gas and sponsorship.
    pub engine: EngineConfig,

    /// Subscriptions created at startup.
    #[serde(default)]
    pub subscriptions: Vec<SeedSubscription>,
}

/// Chain endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    /// HTTP RPC endpoint URL.
    pub rpc_url: String,

    /// ERC-4337 bundler endpoint (default: Pimlico public Arbitrum Sepolia).
    #[serde(default = "default_bundler_url")]
    pub bundler_url: String,

    /// EIP-155 chain ID (default: Arbitrum Sepolia).
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// Entry point (default: canonical v0.7).
    #[serde(default = "default_entry_point")]
    pub entry_point: Address,

    /// Bundler gas price tier.
    #[serde(default)]
    pub fee_tier: FeeTier,

    /// Per-request bundler timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Kernel v0.3.1 smart account controlled by a local owner key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    /// Owner private key (hex, with or without `0x` prefix).
    /// Supports `$VAR` / `${VAR}` for environment variable expansion.
    pub owner_private_key: String,

    /// Kernel smart account address.
    pub address: Address,

    /// ECDSA validator the account is installed with (default: ZeroDev's).
    #[serde(default)]
    pub validator: Option<Address>,

    /// Account factory, for accounts not deployed yet.
    #[serde(default)]
    pub factory: Option<Address>,

    /// Factory calldata deploying this account.
    #[serde(default)]
    pub factory_data: Option<Bytes>,
}

/// Subscription contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// Contract address.
    pub address: Address,

    /// Function each payment calls.
    #[serde(default)]
    pub entry: PaymentEntry,
}

/// Trigger listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Whether to watch the subscription contract for trigger events.
    #[serde(default)]
    pub enabled: bool,

    /// Canonical signature of the trigger event.
    #[serde(default = "default_event_signature")]
    pub event_signature: String,

    /// Seconds between log polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// First block to read; the current head when unset.
    #[serde(default)]
    pub start_block: Option<u64>,

    /// Widest block span per `eth_getLogs` query.
    #[serde(default = "default_max_block_range")]
    pub max_block_range: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            event_signature: default_event_signature(),
            poll_interval_secs: default_poll_interval_secs(),
            start_block: None,
            max_block_range: default_max_block_range(),
        }
    }
}

/// A subscription to create at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSubscription {
    /// Paying account (default: the configured account).
    #[serde(default)]
    pub payer: Option<Address>,

    /// Amount per cycle in token units.
    pub amount: U256,

    /// Cycle length in seconds.
    pub interval_seconds: u64,

    /// Free-form label.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(std::net::Ipv4Addr::new(0, 0, 0, 0))
}

fn default_port() -> u16 {
    4022
}

fn default_bundler_url() -> String {
    PIMLICO_ARBITRUM_SEPOLIA.to_owned()
}

fn default_chain_id() -> u64 {
    ARBITRUM_SEPOLIA
}

fn default_entry_point() -> Address {
    ENTRY_POINT_V07
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_event_signature() -> String {
    "Ping()".to_owned()
}

fn default_poll_interval_secs() -> u64 {
    4
}

fn default_max_block_range() -> u64 {
    DEFAULT_MAX_BLOCK_RANGE
}

impl SchedulerConfig {
    /// Loads configuration from a specific file path.
    ///
    /// After loading, all string values with `$VAR` / `${VAR}` references
    /// are expanded from the process environment. `HOST` and `PORT` env vars
    /// override the file values.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = if Path::new(path).exists() {
            std::fs::read_to_string(path)?
        } else {
            return Err(format!("config file {path} not found").into());
        };
        let mut config = Self::parse(&content)?;

        if let Ok(host) = std::env::var("HOST") {
            if let Ok(addr) = host.parse() {
                config.host = addr;
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.port = p;
            }
        }

        Ok(config)
    }

    /// Parses TOML after expanding environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the expanded text is not a valid configuration.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(&expand_env_vars(content))
    }
}

/// Expands `$VAR` and `${VAR}` patterns in a string from environment variables.
///
/// Unresolved variables are left as-is.
fn expand_env_vars(input: &str) -> String {
    expand_with(input, |name| std::env::var(name).ok())
}

fn expand_with(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }

        let mut var_name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !c.is_ascii_alphanumeric() && c != '_' {
                break;
            }
            var_name.push(c);
            chars.next();
        }

        if var_name.is_empty() {
            result.push('$');
            if braced {
                result.push('{');
            }
        } else if let Some(val) = lookup(&var_name) {
            result.push_str(&val);
        } else {
            result.push('$');
            if braced {
                result.push('{');
            }
            result.push_str(&var_name);
            if braced {
                result.push('}');
            }
        }
    }

    result
}
