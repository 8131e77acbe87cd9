//! Payment calls: a call into the subscription contract, or a plain token
//! transfer.

use alloy_primitives::{Address, Bytes};
use alloy_sol_types::SolCall;
use serde::{Deserialize, Serialize};
use subpay::calls::CallFactory;
use subpay::operation::Call;
use subpay::subscription::Subscription;

use crate::contract::{IERC20Permit, ISubscription};

/// What a payment cycle calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEntry {
    /// `executePayment(subscriber)`, charging one subscriber.
    #[default]
    ExecutePayment,
    /// `performUpkeep(0x)`, letting the contract settle whatever is due.
    PerformUpkeep,
    /// `transfer(recipient, amount)` on the token, bypassing the contract.
    Transfer {
        /// Receiver of each cycle's amount.
        recipient: Address,
    },
}

/// Emits one call per payment cycle.
#[derive(Debug, Clone, Copy)]
pub struct SubscriptionCalls {
    contract: Address,
    token: Address,
    entry: PaymentEntry,
}

impl SubscriptionCalls {
    /// Calls `entry` on `contract`; transfers move `token`.
    #[must_use]
    pub const fn new(contract: Address, token: Address, entry: PaymentEntry) -> Self {
        Self {
            contract,
            token,
            entry,
        }
    }

    /// The subscription contract.
    #[must_use]
    pub const fn contract(&self) -> Address {
        self.contract
    }
}

impl CallFactory for SubscriptionCalls {
    fn payment_calls(&self, subscription: &Subscription) -> Vec<Call> {
        let (target, data) = match self.entry {
            PaymentEntry::ExecutePayment => (
                self.contract,
                ISubscription::executePaymentCall {
                    subscriber: subscription.payer_account,
                }
                .abi_encode(),
            ),
            PaymentEntry::PerformUpkeep => (
                self.contract,
                ISubscription::performUpkeepCall {
                    performData: Bytes::new(),
                }
                .abi_encode(),
            ),
            PaymentEntry::Transfer { recipient } => (
                self.token,
                IERC20Permit::transferCall {
                    to: recipient,
                    amount: subscription.amount,
                }
                .abi_encode(),
            ),
        };
        vec![Call::new(target, data.into())]
    }
}
