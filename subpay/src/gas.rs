//! Gas limits and network fees.
//!
//! The one hard numeric rule of the engine lives here:
//!
//! ```text
//! sponsor_post_op_gas_limit = max(baseline, sponsor_declared_overhead)
//! ```
//!
//! The overhead is read live from the sponsor for every operation since it can
//! change between deployments. Fee quotes are retried with backoff; a zero or
//! inverted quote counts as unavailable and nothing is submitted with it.

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::backoff::Backoff;
use crate::error::EncodingError;
use crate::operation::{FeeQuote, GasLimits};

/// Failure to price an operation.
#[derive(Debug, thiserror::Error)]
pub enum FeeQuoteError {
    /// The fee oracle could not be reached or answered with an error.
    #[error("fee oracle unavailable: {0}")]
    Unavailable(String),
    /// The oracle answered with a zero or inconsistent quote.
    #[error("fee oracle returned unusable quote (max {max_fee_per_gas}, priority {max_priority_fee_per_gas})")]
    Unusable {
        /// Quoted max fee.
        max_fee_per_gas: u128,
        /// Quoted priority fee.
        max_priority_fee_per_gas: u128,
    },
    /// The sponsor's declared overhead could not be read.
    #[error("sponsor overhead unavailable: {0}")]
    SponsorOverhead(String),
}

/// Current network fee levels.
#[async_trait]
pub trait FeeOracle: Send + Sync {
    /// Returns the fee quote to use for the next operation.
    async fn fee_quote(&self) -> Result<FeeQuote, FeeQuoteError>;
}

/// The sponsor's declared post-operation gas overhead.
#[async_trait]
pub trait SponsorOverhead: Send + Sync {
    /// Gas the sponsor needs for its post-operation accounting.
    async fn declared_overhead(&self, sponsor: Address) -> Result<u128, FeeQuoteError>;
}

/// Baseline gas limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPolicy {
    /// Execution-phase gas.
    pub call_gas_limit: u64,
    /// Relay overhead gas.
    pub pre_verification_gas: u64,
    /// Account verification gas.
    pub verification_gas_limit: u64,
    /// Sponsor validation gas.
    pub sponsor_verification_gas_limit: u64,
    /// Floor for the sponsor post-op limit.
    pub sponsor_post_op_floor: u64,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            call_gas_limit: 100_000,
            pre_verification_gas: 100_000,
            verification_gas_limit: 500_000,
            sponsor_verification_gas_limit: 500_000,
            sponsor_post_op_floor: 10_000,
        }
    }
}

impl GasPolicy {
    /// Limits for a sponsor declaring `overhead` post-op gas.
    #[must_use]
    pub fn limits(&self, overhead: u128) -> GasLimits {
        GasLimits {
            call_gas_limit: u128::from(self.call_gas_limit),
            pre_verification_gas: u128::from(self.pre_verification_gas),
            verification_gas_limit: u128::from(self.verification_gas_limit),
            sponsor_verification_gas_limit: u128::from(self.sponsor_verification_gas_limit),
            sponsor_post_op_gas_limit: u128::from(self.sponsor_post_op_floor).max(overhead),
        }
    }
}

/// Checks the post-op invariant on already computed limits.
///
/// # Errors
///
/// [`EncodingError::SponsorGasBelowOverhead`] if the limit is short.
pub fn check_sponsor_allowance(gas: &GasLimits, overhead: u128) -> Result<(), EncodingError> {
    if gas.sponsor_post_op_gas_limit < overhead {
        return Err(EncodingError::SponsorGasBelowOverhead {
            limit: gas.sponsor_post_op_gas_limit,
            overhead,
        });
    }
    Ok(())
}

/// Gas limits plus fees for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasEstimate {
    /// Computed limits.
    pub limits: GasLimits,
    /// Fee quote to submit with.
    pub fees: FeeQuote,
    /// Overhead the sponsor declared at estimation time.
    pub sponsor_overhead: u128,
}

/// Combines the fee oracle, the sponsor overhead and the baseline policy.
#[derive(Clone)]
pub struct GasEstimator {
    policy: GasPolicy,
    oracle: Arc<dyn FeeOracle>,
    overhead: Arc<dyn SponsorOverhead>,
    attempts: u32,
    backoff: Duration,
}

impl std::fmt::Debug for GasEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GasEstimator")
            .field("policy", &self.policy)
            .field("attempts", &self.attempts)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl GasEstimator {
    /// Creates an estimator that tries the oracle once.
    #[must_use]
    pub fn new(
        policy: GasPolicy,
        oracle: Arc<dyn FeeOracle>,
        overhead: Arc<dyn SponsorOverhead>,
    ) -> Self {
        Self {
            policy,
            oracle,
            overhead,
            attempts: 1,
            backoff: Duration::from_millis(500),
        }
    }

    /// Retries the fee quote up to `attempts` times, doubling `backoff` in between.
    #[must_use]
    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.backoff = backoff;
        self
    }

    /// Prices an operation for `sponsor`.
    ///
    /// # Errors
    ///
    /// [`FeeQuoteError`] when the overhead cannot be read or no usable quote
    /// arrives within the retry budget.
    pub async fn estimate(&self, sponsor: Address) -> Result<GasEstimate, FeeQuoteError> {
        let sponsor_overhead = self.overhead.declared_overhead(sponsor).await?;
        let limits = self.policy.limits(sponsor_overhead);
        let fees = self.quote_with_retry().await?;
        tracing::debug!(
            sponsor = %sponsor,
            sponsor_overhead,
            sponsor_post_op_gas_limit = limits.sponsor_post_op_gas_limit,
            max_fee_per_gas = fees.max_fee_per_gas,
            "gas estimated"
        );
        Ok(GasEstimate {
            limits,
            fees,
            sponsor_overhead,
        })
    }

    async fn quote_with_retry(&self) -> Result<FeeQuote, FeeQuoteError> {
        let mut backoff = Backoff::new(self.backoff, self.backoff.saturating_mul(16));
        let mut attempt = 1;
        loop {
            let result = self.oracle.fee_quote().await.and_then(|quote| {
                if quote.is_usable() {
                    Ok(quote)
                } else {
                    Err(FeeQuoteError::Unusable {
                        max_fee_per_gas: quote.max_fee_per_gas,
                        max_priority_fee_per_gas: quote.max_priority_fee_per_gas,
                    })
                }
            });
            match result {
                Ok(quote) => return Ok(quote),
                Err(e) if attempt >= self.attempts => return Err(e),
                Err(e) => {
                    let delay = backoff.next_delay();
                    tracing::warn!(attempt, error = %e, ?delay, "fee quote failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
