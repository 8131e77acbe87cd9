//! Subscription records and their due-state.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::operation::OperationHandle;
use crate::timestamp::UnixTimestamp;

/// Store-assigned, immutable subscription identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl Display for SubscriptionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The in-flight marker guarding a subscription against concurrent execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "operation")]
pub enum PendingExecution {
    /// A job owns the subscription; nothing has reached the relay yet.
    Dispatched,
    /// A job owns the subscription and the operation was handed to the relay.
    Submitted(OperationHandle),
    /// No job owns it, but an operation may still land. Must be reconciled
    /// against the relay before the subscription becomes eligible again.
    Unresolved(OperationHandle),
}

impl PendingExecution {
    /// The operation reference, once one exists.
    #[must_use]
    pub const fn operation(&self) -> Option<OperationHandle> {
        match self {
            Self::Dispatched => None,
            Self::Submitted(h) | Self::Unresolved(h) => Some(*h),
        }
    }
}

/// A recurring payment from a smart account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique id, immutable.
    pub id: SubscriptionId,
    /// Smart account that pays.
    pub payer_account: Address,
    /// Amount per cycle in the token's smallest unit.
    pub amount: U256,
    /// Cycle length in seconds, always positive.
    pub interval_seconds: u64,
    /// Time of the most recently confirmed payment (creation time before the first one).
    pub last_payment_at: UnixTimestamp,
    /// Cleared permanently on cancellation.
    pub active: bool,
    /// At most one in-flight operation.
    pub pending_execution: Option<PendingExecution>,
    /// Free-form label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Subscription {
    /// `true` iff active, the interval has elapsed since the last confirmed
    /// payment, and nothing is in flight.
    #[must_use]
    pub fn is_due(&self, now: UnixTimestamp) -> bool {
        self.active
            && self.pending_execution.is_none()
            && now.seconds_since(self.last_payment_at) >= self.interval_seconds
    }

    /// When the subscription next becomes due, ignoring in-flight state.
    #[must_use]
    pub fn next_due_at(&self) -> UnixTimestamp {
        self.last_payment_at + self.interval_seconds
    }
}

/// Input for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    /// Smart account that pays.
    pub payer_account: Address,
    /// Amount per cycle in the token's smallest unit.
    pub amount: U256,
    /// Cycle length in seconds.
    pub interval_seconds: u64,
    /// Free-form label.
    #[serde(default)]
    pub description: Option<String>,
}

/// Result of one execution cycle, as recorded in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    /// Payment confirmed on-chain at `at`.
    Confirmed {
        /// Confirmation time; becomes the new `last_payment_at`.
        at: UnixTimestamp,
    },
    /// Cycle failed; the subscription stays due.
    Failed,
}
