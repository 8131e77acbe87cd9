//! Sponsored operation model.
//!
//! A [`SponsoredOperation`] is the relay-bound bundle: the account's calls,
//! the computed gas limits, the sponsor and its payload, network fees and the
//! account signature. It walks a small state machine
//! (`Built -> Submitted -> Confirmed | Failed | TimedOut`) whose terminal
//! states are final.

use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A single call executed by the smart account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Call {
    /// Contract (or account) being called.
    pub target: Address,
    /// Native value forwarded with the call. Always zero for sponsored payments.
    pub value: U256,
    /// ABI-encoded calldata.
    pub data: Bytes,
}

impl Call {
    /// A zero-value call to `target` with `data`.
    #[must_use]
    pub const fn new(target: Address, data: Bytes) -> Self {
        Self {
            target,
            value: U256::ZERO,
            data,
        }
    }
}

/// Tracking reference for a submitted operation (the relay's operation hash).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationHandle(pub B256);

impl Display for OperationHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Gas limits attached to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasLimits {
    /// Gas for the account's execution phase.
    pub call_gas_limit: u128,
    /// Overhead gas paid to the relay for calldata and bundling.
    pub pre_verification_gas: u128,
    /// Gas for the account's signature verification.
    pub verification_gas_limit: u128,
    /// Gas for the sponsor's validation phase.
    pub sponsor_verification_gas_limit: u128,
    /// Gas for the sponsor's post-operation accounting.
    pub sponsor_post_op_gas_limit: u128,
}

/// Network fee parameters (EIP-1559 style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeQuote {
    /// Maximum total fee per gas unit.
    pub max_fee_per_gas: u128,
    /// Maximum priority tip per gas unit.
    pub max_priority_fee_per_gas: u128,
}

impl FeeQuote {
    /// Whether the quote carries a usable (non-zero) fee.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.max_fee_per_gas > 0 && self.max_priority_fee_per_gas <= self.max_fee_per_gas
    }
}

/// Factory call that deploys a counterfactual account on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDeployment {
    /// Account factory contract.
    pub factory: Address,
    /// Calldata passed to the factory.
    pub factory_data: Bytes,
}

/// Lifecycle of a [`SponsoredOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "handle")]
pub enum OperationState {
    /// Assembled and signed, not yet handed to the relay.
    Built,
    /// Accepted by the relay.
    Submitted(OperationHandle),
    /// Included and executed successfully.
    Confirmed,
    /// Rejected by the relay or reverted on-chain.
    Failed,
    /// No receipt within the bounded wait.
    TimedOut,
}

impl OperationState {
    /// Terminal states never transition again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed | Self::TimedOut)
    }
}

/// Attempted an illegal lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid operation transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// State the operation was in.
    pub from: OperationState,
    /// State that was requested.
    pub to: OperationState,
}

/// A fully assembled sponsored operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SponsoredOperation {
    /// The paying smart account.
    pub sender: Address,
    /// Account-level replay nonce.
    pub nonce: U256,
    /// Present only while the account is not yet deployed.
    pub deployment: Option<AccountDeployment>,
    /// The account's `execute` calldata wrapping the target calls.
    pub call_data: Bytes,
    /// Computed gas limits.
    pub gas: GasLimits,
    /// Network fees.
    pub fees: FeeQuote,
    /// Fee sponsor (paymaster) contract.
    pub sponsor: Address,
    /// Encoded sponsorship payload, see [`crate::sponsorship`].
    pub sponsorship_data: Bytes,
    /// Account signature over the operation hash. Empty until signed.
    pub signature: Bytes,
    /// Lifecycle state.
    pub state: OperationState,
}

impl SponsoredOperation {
    /// Moves the operation to `next`, enforcing the lifecycle.
    ///
    /// Allowed: `Built -> Submitted`, `Built -> Failed` (relay rejection),
    /// and `Submitted -> Confirmed | Failed | TimedOut`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTransition`] for anything else, including any move out
    /// of a terminal state.
    pub fn transition(&mut self, next: OperationState) -> Result<(), InvalidTransition> {
        let allowed = matches!(
            (self.state, next),
            (OperationState::Built, OperationState::Submitted(_) | OperationState::Failed)
                | (
                    OperationState::Submitted(_),
                    OperationState::Confirmed | OperationState::Failed | OperationState::TimedOut
                )
        );
        if allowed {
            self.state = next;
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self.state,
                to: next,
            })
        }
    }
}

/// Terminal receipt for an included operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReceipt {
    /// The operation this receipt belongs to.
    pub handle: OperationHandle,
    /// `false` means the operation was included but its execution reverted.
    pub success: bool,
    /// Gas actually consumed.
    pub actual_gas_used: U256,
    /// Fee actually charged, in native wei.
    pub actual_gas_cost: U256,
    /// Bundle transaction that included the operation.
    pub transaction_hash: Option<B256>,
    /// Revert reason, when the relay reports one.
    pub reason: Option<String>,
}

/// What the relay currently knows about an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationStatus {
    /// Included on-chain with a terminal receipt.
    Included(OperationReceipt),
    /// Known to the relay, not yet included.
    Pending,
    /// Neither included nor held by the relay (dropped or never accepted).
    Unknown,
}
