//! Token-spend authorizations (permits).
//!
//! An authorization lets the sponsor pull at most `value` tokens from the
//! payer. Its `deadline` is always [`U256::MAX`]: the sponsor checks it inside
//! the verification phase, where the chain clock is not readable, so expiry is
//! carried by the cap and the on-chain nonce instead of time.
//!
//! Authorizations are built fresh for every attempt and never cached.

use alloy_primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::account::SmartAccount;

/// Deadline used for every authorization.
pub const PERMIT_DEADLINE: U256 = U256::MAX;

/// Why an authorization could not be produced.
#[derive(Debug, thiserror::Error)]
pub enum AuthorizationError {
    /// The token's current permit nonce could not be read.
    #[error("failed to fetch permit nonce: {0}")]
    NonceFetch(String),
    /// The payer's key could not produce a signature.
    #[error("failed to sign authorization: {0}")]
    Signing(String),
    /// The account's on-chain state (deployment, entry nonce) could not be read.
    #[error("account state unavailable: {0}")]
    AccountState(String),
    /// No signing account is registered for the payer.
    #[error("no account registered for payer {0}")]
    UnknownAccount(Address),
    /// The payer's token balance could not be read.
    #[error("failed to fetch token balance: {0}")]
    BalanceFetch(String),
    /// The payer cannot cover one cycle.
    #[error("token balance {balance} below cycle amount {required}")]
    InsufficientBalance {
        /// Balance at pre-flight.
        balance: U256,
        /// The subscription's per-cycle amount.
        required: U256,
    },
}

/// A signed permit bound to one `(owner, spender, value, nonce, deadline)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedAuthorization {
    /// Token holder (the payer's smart account).
    pub owner: Address,
    /// Party allowed to pull tokens (the sponsor).
    pub spender: Address,
    /// Spend cap.
    pub value: U256,
    /// On-chain permit nonce at signing time.
    pub nonce: U256,
    /// Always [`PERMIT_DEADLINE`].
    pub deadline: U256,
    /// Normalized signature, with any deployment wrapper removed.
    pub signature: Bytes,
}

/// Builds signed authorizations for one token.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Token balance of `owner`.
    async fn balance(&self, owner: Address) -> Result<U256, AuthorizationError>;

    /// Signs a permit letting `spender` pull up to `value` from `account`.
    async fn authorize(
        &self,
        account: &dyn SmartAccount,
        spender: Address,
        value: U256,
    ) -> Result<SignedAuthorization, AuthorizationError>;
}
