//! Error taxonomy for a single execution job.
//!
//! Every job ends either in a confirmed payment or in exactly one
//! [`FailureReason`]. Per-layer errors live next to the seam that raises
//! them ([`AuthorizationError`], [`FeeQuoteError`], [`RelayError`],
//! [`StoreError`]) and fold into [`ExecutionError`].

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::authorization::AuthorizationError;
use crate::gas::FeeQuoteError;
use crate::operation::{InvalidTransition, OperationHandle};
use crate::relay::RelayError;
use crate::store::StoreError;

/// Malformed operation content. Should not happen with well-typed inputs and
/// is never retried silently.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The sponsorship payload needs an authorization signature.
    #[error("authorization signature is empty")]
    EmptySignature,
    /// An operation must carry at least one call.
    #[error("operation has no calls")]
    EmptyCalls,
    /// The computed sponsor post-op limit is below the sponsor's declared overhead.
    #[error("sponsor post-op gas limit {limit} below declared overhead {overhead}")]
    SponsorGasBelowOverhead {
        /// Computed limit.
        limit: u128,
        /// Overhead the sponsor declared.
        overhead: u128,
    },
    /// The account could not encode or hash the operation.
    #[error("account encoding failed: {0}")]
    Account(String),
    /// Lifecycle violation while assembling.
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

/// Machine-readable failure category, reported per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Nonce fetch or signing failed.
    AuthorizationError,
    /// Operation content was malformed.
    EncodingError,
    /// Fee oracle or sponsor overhead unavailable.
    FeeQuoteUnavailable,
    /// Relay refused the operation before inclusion.
    RelayRejected,
    /// Outcome unknown after submission.
    RelayTimeout,
    /// Included but execution reverted.
    OnChainRevert,
    /// Store failed to record state.
    StoreError,
}

impl FailureReason {
    /// Stable string form, as it appears in logs and reports.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationError => "authorization_error",
            Self::EncodingError => "encoding_error",
            Self::FeeQuoteUnavailable => "fee_quote_unavailable",
            Self::RelayRejected => "relay_rejected",
            Self::RelayTimeout => "relay_timeout",
            Self::OnChainRevert => "on_chain_revert",
            Self::StoreError => "store_error",
        }
    }
}

impl Display for FailureReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job did not produce a confirmed payment.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// Authorization could not be built.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    /// Operation could not be encoded.
    #[error(transparent)]
    Encoding(#[from] EncodingError),
    /// No usable fee quote after retries.
    #[error(transparent)]
    FeeQuote(#[from] FeeQuoteError),
    /// Relay refused or lost track of the operation.
    #[error(transparent)]
    Relay(#[from] RelayError),
    /// The operation was included and reverted.
    #[error("operation {handle} reverted on-chain: {}", reason.as_deref().unwrap_or("no reason"))]
    OnChainRevert {
        /// The reverted operation.
        handle: OperationHandle,
        /// Revert reason if the relay reported one.
        reason: Option<String>,
    },
    /// Store mutation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ExecutionError {
    /// Category of this error.
    #[must_use]
    pub const fn reason(&self) -> FailureReason {
        match self {
            Self::Authorization(_) => FailureReason::AuthorizationError,
            Self::Encoding(_) => FailureReason::EncodingError,
            Self::FeeQuote(_) => FailureReason::FeeQuoteUnavailable,
            Self::Relay(RelayError::Rejected(_)) => FailureReason::RelayRejected,
            Self::Relay(RelayError::Timeout(_) | RelayError::Transport(_)) => {
                FailureReason::RelayTimeout
            }
            Self::OnChainRevert { .. } => FailureReason::OnChainRevert,
            Self::Store(_) => FailureReason::StoreError,
        }
    }
}
