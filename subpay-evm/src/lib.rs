#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EVM binding for the `subpay` engine.
//!
//! Implements the engine's seams for ERC-4337 (entry point v0.7) accounts that
//! pay gas in an ERC-20 token through a permit-based token paymaster.
//!
//! # Modules
//!
//! - [`permit`] - EIP-2612 permit builder ([`subpay::Authorizer`])
//! - [`account`] - ECDSA-owned smart account ([`subpay::SmartAccount`])
//! - [`user_op`] - User operation packing and hashing
//! - [`bundler`] - Bundler JSON-RPC client ([`subpay::Relay`], [`subpay::FeeOracle`])
//! - [`sponsor`] - Paymaster overhead reader ([`subpay::SponsorOverhead`])
//! - [`calls`] - Subscription contract calls ([`subpay::CallFactory`])
//! - [`trigger`] - Log-polling trigger source ([`subpay::TriggerSource`])
//! - [`signature`] - EIP-6492 envelopes
//! - [`contract`] - Solidity interfaces
//! - [`networks`] - Known deployments

pub mod account;
pub mod bundler;
pub mod calls;
pub mod contract;
pub mod error;
pub mod networks;
pub mod permit;
pub mod signature;
pub mod sponsor;
pub mod trigger;
pub mod user_op;

#[cfg(test)]
mod testing;

pub use account::{LocalSmartAccount, SignerLike};
pub use bundler::{BundlerClient, FeeTier};
pub use calls::{PaymentEntry, SubscriptionCalls};
pub use error::{BundlerError, ChainError};
pub use permit::PermitBuilder;
pub use sponsor::PaymasterOverhead;
pub use trigger::LogTriggerSource;
