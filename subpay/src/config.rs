//! Engine configuration.
//!
//! Everything except the sponsorship target has a default, so a config file
//! only needs the `[engine.sponsorship]` token and sponsor.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::gas::GasPolicy;

/// Which sponsor is paid and how much it may pull per operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsorshipConfig {
    /// Token the sponsor is reimbursed in.
    pub token: Address,
    /// Sponsor (paymaster) contract.
    pub sponsor: Address,
    /// Authorization cap per operation, in token units.
    #[serde(default = "default_max_spend")]
    pub max_spend: U256,
    /// Leading byte of the sponsorship payload.
    #[serde(default)]
    pub reserved_byte: u8,
}

/// One token at six decimals.
const fn default_max_spend() -> U256 {
    U256::from_limbs([1_000_000, 0, 0, 0])
}

impl SponsorshipConfig {
    /// Sponsorship with the default cap and reserved byte.
    #[must_use]
    pub const fn new(token: Address, sponsor: Address) -> Self {
        Self {
            token,
            sponsor,
            max_spend: default_max_spend(),
            reserved_byte: 0,
        }
    }
}

/// Timing, concurrency and gas settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between scheduler ticks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Bounded wait for a receipt after submission.
    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
    /// Receipt polling period.
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    /// Fee oracle attempts per job.
    #[serde(default = "default_fee_quote_attempts")]
    pub fee_quote_attempts: u32,
    /// Initial delay between fee oracle attempts.
    #[serde(default = "default_fee_quote_backoff_ms")]
    pub fee_quote_backoff_ms: u64,
    /// Jobs running at once across all subscriptions.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Baseline gas limits.
    #[serde(default)]
    pub gas: GasPolicy,
    /// Sponsor and token.
    pub sponsorship: SponsorshipConfig,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_receipt_timeout_secs() -> u64 {
    60
}

fn default_receipt_poll_interval_ms() -> u64 {
    2_000
}

fn default_fee_quote_attempts() -> u32 {
    3
}

fn default_fee_quote_backoff_ms() -> u64 {
    500
}

fn default_max_concurrent_jobs() -> usize {
    16
}

impl EngineConfig {
    /// Defaults around the given sponsorship.
    #[must_use]
    pub fn new(sponsorship: SponsorshipConfig) -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
            receipt_poll_interval_ms: default_receipt_poll_interval_ms(),
            fee_quote_attempts: default_fee_quote_attempts(),
            fee_quote_backoff_ms: default_fee_quote_backoff_ms(),
            max_concurrent_jobs: default_max_concurrent_jobs(),
            gas: GasPolicy::default(),
            sponsorship,
        }
    }

    /// Tick period, at least one second.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    /// Receipt wait bound.
    #[must_use]
    pub const fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    /// Receipt polling period.
    #[must_use]
    pub const fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    /// Initial fee oracle backoff.
    #[must_use]
    pub const fn fee_quote_backoff(&self) -> Duration {
        Duration::from_millis(self.fee_quote_backoff_ms)
    }
}
