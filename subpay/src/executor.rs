//! Per-subscription execution job.
//!
//! A job owns one subscription from [`SubscriptionStore::mark_executing`]
//! until it records an outcome or releases the subscription as unresolved:
//!
//! 1. resolve the payer's account and the payment calls, and check the
//!    payer's token balance covers one cycle
//! 2. sign a fresh authorization for the sponsor
//! 3. encode the sponsorship payload
//! 4. price the operation (fee quote + sponsor overhead)
//! 5. assemble and sign the operation
//! 6. record its hash in the store, then submit
//! 7. wait (bounded) for the receipt, then re-read the balance to report
//!    what the cycle cost the payer
//!
//! Failures before step 6 leave nothing on-chain and only clear the guard.
//! After step 6 an ambiguous relay answer releases the subscription as
//! unresolved; [`Executor::reconcile`] settles it from the relay's view on a
//! later tick so a payment that did land is never submitted twice.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;

use crate::account::{AccountError, AccountRegistry, SmartAccount};
use crate::authorization::{AuthorizationError, Authorizer};
use crate::calls::CallFactory;
use crate::config::{EngineConfig, SponsorshipConfig};
use crate::error::{EncodingError, ExecutionError, FailureReason};
use crate::gas::{FeeOracle, GasEstimator, SponsorOverhead, check_sponsor_allowance};
use crate::operation::{
    OperationHandle, OperationReceipt, OperationState, OperationStatus, SponsoredOperation,
};
use crate::relay::{Relay, RelayError, await_receipt};
use crate::sponsorship::SponsorshipPayload;
use crate::store::{StoreError, SubscriptionStore};
use crate::subscription::{Outcome, Subscription, SubscriptionId};
use crate::timestamp::{Clock, UnixTimestamp};

/// What started a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// The periodic scheduler tick.
    Timer,
    /// An on-chain event.
    Event,
}

impl Display for Trigger {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Timer => "timer",
            Self::Event => "event",
        })
    }
}

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum JobOutcome {
    /// Payment confirmed; `last_payment_at` is now `at`.
    Confirmed {
        /// The confirmed operation.
        handle: OperationHandle,
        /// Confirmation time.
        at: UnixTimestamp,
        /// Token balance drop across the cycle, when both reads succeeded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_deducted: Option<U256>,
    },
    /// Cycle failed; the subscription is due again.
    Failed {
        /// Failure category.
        reason: FailureReason,
    },
    /// Submitted with unknown outcome; settled by a later reconciliation.
    Unresolved {
        /// The operation to reconcile.
        handle: OperationHandle,
        /// Why the outcome is unknown.
        reason: FailureReason,
    },
}

/// Result of one job, for monitoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// Subscription the job ran for.
    pub subscription: SubscriptionId,
    /// What started it.
    pub trigger: Trigger,
    /// How it ended.
    pub outcome: JobOutcome,
    /// Final lifecycle state of the operation, if one was assembled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationState>,
}

impl JobReport {
    /// Whether the payment was confirmed.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.outcome, JobOutcome::Confirmed { .. })
    }
}

/// The engine's collaborators.
pub struct Collaborators {
    /// Subscription records.
    pub store: Arc<dyn SubscriptionStore>,
    /// Payer accounts.
    pub accounts: Arc<AccountRegistry>,
    /// Permit builder.
    pub authorizer: Arc<dyn Authorizer>,
    /// Network fee source.
    pub fee_oracle: Arc<dyn FeeOracle>,
    /// Sponsor overhead source.
    pub sponsor_overhead: Arc<dyn SponsorOverhead>,
    /// Operation relay.
    pub relay: Arc<dyn Relay>,
    /// Payment call factory.
    pub calls: Arc<dyn CallFactory>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}

/// How a job left the subscription.
enum Settlement {
    Confirmed(OperationReceipt, Option<U256>),
    Failed(ExecutionError),
    Unresolved(OperationHandle, ExecutionError),
}

/// A settlement plus how far the operation got.
struct Execution {
    settlement: Settlement,
    operation: Option<OperationState>,
}

impl Execution {
    fn unassembled(error: ExecutionError) -> Self {
        Self {
            settlement: Settlement::Failed(error),
            operation: None,
        }
    }

    fn at(settlement: Settlement, op: &SponsoredOperation) -> Self {
        Self {
            settlement,
            operation: Some(op.state),
        }
    }
}

/// A signed operation ready for submission.
struct Prepared {
    op: SponsoredOperation,
    account: Arc<dyn SmartAccount>,
    balance_before: U256,
}

/// Moves `op` along its lifecycle. An illegal move is logged and leaves the
/// state unchanged; the settlement already reflects what the relay said.
fn advance(op: &mut SponsoredOperation, next: OperationState) {
    if let Err(e) = op.transition(next) {
        tracing::error!(error = %e, "operation lifecycle violated");
    }
}

/// Runs execution jobs.
pub struct Executor {
    store: Arc<dyn SubscriptionStore>,
    accounts: Arc<AccountRegistry>,
    authorizer: Arc<dyn Authorizer>,
    gas: GasEstimator,
    relay: Arc<dyn Relay>,
    calls: Arc<dyn CallFactory>,
    clock: Arc<dyn Clock>,
    sponsorship: SponsorshipConfig,
    receipt_timeout: Duration,
    poll_interval: Duration,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("gas", &self.gas)
            .field("sponsorship", &self.sponsorship)
            .field("receipt_timeout", &self.receipt_timeout)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl Executor {
    /// Wires an executor from its collaborators and the engine config.
    #[must_use]
    pub fn new(parts: Collaborators, config: &EngineConfig) -> Self {
        let gas = GasEstimator::new(config.gas, parts.fee_oracle, parts.sponsor_overhead)
            .with_retry(config.fee_quote_attempts, config.fee_quote_backoff());
        Self {
            store: parts.store,
            accounts: parts.accounts,
            authorizer: parts.authorizer,
            gas,
            relay: parts.relay,
            calls: parts.calls,
            clock: parts.clock,
            sponsorship: config.sponsorship.clone(),
            receipt_timeout: config.receipt_timeout(),
            poll_interval: config.receipt_poll_interval(),
        }
    }

    /// The store jobs read and write.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SubscriptionStore> {
        &self.store
    }

    /// The clock jobs read.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Claims `id` and runs one job for it.
    ///
    /// Returns `None` when the subscription was not eligible at claim time
    /// (inactive, not due, or already in flight). Never fails: every error
    /// ends up in the report.
    pub async fn dispatch(&self, id: SubscriptionId, trigger: Trigger) -> Option<JobReport> {
        let now = self.clock.now();
        match self.store.mark_executing(id, now).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(subscription = %id, %trigger, "not eligible, skipping");
                return None;
            }
            Err(e) => {
                tracing::error!(subscription = %id, %trigger, reason = %FailureReason::StoreError, error = %e, "failed to claim subscription");
                return None;
            }
        }

        let span = tracing::info_span!("subpay.job", subscription = %id, %trigger);
        let (outcome, operation) = async {
            let execution = match self.store.get(id).await {
                Ok(Some(subscription)) => self.execute(&subscription).await,
                Ok(None) => Execution::unassembled(StoreError::NotFound(id).into()),
                Err(e) => Execution::unassembled(e.into()),
            };
            (self.settle(id, execution.settlement).await, execution.operation)
        }
        .instrument(span)
        .await;

        Some(JobReport {
            subscription: id,
            trigger,
            outcome,
            operation,
        })
    }

    async fn execute(&self, subscription: &Subscription) -> Execution {
        let Prepared {
            mut op,
            account,
            balance_before,
        } = match self.prepare(subscription).await {
            Ok(prepared) => prepared,
            Err(e) => return Execution::unassembled(e),
        };

        let handle = OperationHandle(account.operation_hash(&op));
        if let Err(e) = self.store.attach_operation(subscription.id, handle).await {
            return Execution::at(Settlement::Failed(e.into()), &op);
        }

        let handle = match self.relay.submit(&op).await {
            Ok(accepted) => {
                if accepted != handle {
                    tracing::warn!(expected = %handle, %accepted, "relay returned a different operation hash");
                    if let Err(e) = self.store.attach_operation(subscription.id, accepted).await {
                        advance(&mut op, OperationState::Submitted(accepted));
                        return Execution::at(Settlement::Unresolved(handle, e.into()), &op);
                    }
                }
                accepted
            }
            Err(RelayError::Rejected(message)) => {
                advance(&mut op, OperationState::Failed);
                return Execution::at(
                    Settlement::Failed(RelayError::Rejected(message).into()),
                    &op,
                );
            }
            Err(e) => {
                // The relay may hold it; track it under the local hash.
                advance(&mut op, OperationState::Submitted(handle));
                advance(&mut op, OperationState::TimedOut);
                return Execution::at(Settlement::Unresolved(handle, e.into()), &op);
            }
        };
        if let Err(e) = op.transition(OperationState::Submitted(handle)) {
            return Execution::at(
                Settlement::Unresolved(handle, EncodingError::from(e).into()),
                &op,
            );
        }
        tracing::info!(operation = %handle, "operation submitted");

        let settlement = match await_receipt(
            self.relay.as_ref(),
            handle,
            self.receipt_timeout,
            self.poll_interval,
        )
        .await
        {
            Ok(receipt) if receipt.success => {
                advance(&mut op, OperationState::Confirmed);
                let deducted = self.deducted(subscription, balance_before).await;
                Settlement::Confirmed(receipt, deducted)
            }
            Ok(receipt) => {
                advance(&mut op, OperationState::Failed);
                Settlement::Failed(ExecutionError::OnChainRevert {
                    handle,
                    reason: receipt.reason,
                })
            }
            Err(e) => {
                advance(&mut op, OperationState::TimedOut);
                Settlement::Unresolved(handle, e.into())
            }
        };
        Execution::at(settlement, &op)
    }

    /// How much the payer's balance dropped since pre-flight.
    async fn deducted(&self, subscription: &Subscription, before: U256) -> Option<U256> {
        match self.authorizer.balance(subscription.payer_account).await {
            Ok(after) => Some(before.saturating_sub(after)),
            Err(e) => {
                tracing::warn!(error = %e, "post-payment balance unavailable");
                None
            }
        }
    }

    /// Steps 1 to 5: everything that happens before the relay sees anything.
    async fn prepare(&self, subscription: &Subscription) -> Result<Prepared, ExecutionError> {
        let account = self
            .accounts
            .get(&subscription.payer_account)
            .ok_or(AuthorizationError::UnknownAccount(subscription.payer_account))?;

        let calls = self.calls.payment_calls(subscription);
        if calls.is_empty() {
            return Err(EncodingError::EmptyCalls.into());
        }

        let balance_before = self.authorizer.balance(subscription.payer_account).await?;
        if balance_before.is_zero() || balance_before < subscription.amount {
            return Err(AuthorizationError::InsufficientBalance {
                balance: balance_before,
                required: subscription.amount,
            }
            .into());
        }

        let sponsor = self.sponsorship.sponsor;
        let authorization = self
            .authorizer
            .authorize(account.as_ref(), sponsor, self.sponsorship.max_spend)
            .await?;
        tracing::debug!(nonce = %authorization.nonce, cap = %authorization.value, "authorization signed");

        let sponsorship_data = SponsorshipPayload {
            reserved: self.sponsorship.reserved_byte,
            token: self.sponsorship.token,
            spend_cap: authorization.value,
            signature: &authorization.signature,
        }
        .encode()?;

        let estimate = self.gas.estimate(sponsor).await?;

        let nonce = account
            .operation_nonce()
            .await
            .map_err(|e| AuthorizationError::NonceFetch(e.to_string()))?;
        let deployment = account
            .deployment()
            .await
            .map_err(|e| AuthorizationError::AccountState(e.to_string()))?;
        let call_data = account
            .encode_calls(&calls)
            .map_err(|e| EncodingError::Account(e.to_string()))?;

        let mut op = SponsoredOperation {
            sender: account.address(),
            nonce,
            deployment,
            call_data,
            gas: estimate.limits,
            fees: estimate.fees,
            sponsor,
            sponsorship_data,
            signature: Default::default(),
            state: OperationState::Built,
        };
        check_sponsor_allowance(&op.gas, estimate.sponsor_overhead)?;

        op.signature = account
            .sign_operation(&op)
            .await
            .map_err(|e| match e {
                AccountError::Encoding(message) => ExecutionError::from(EncodingError::Account(message)),
                other => AuthorizationError::Signing(other.to_string()).into(),
            })?;

        Ok(Prepared {
            op,
            account,
            balance_before,
        })
    }

    /// Writes the job's end state to the store and produces its outcome.
    async fn settle(&self, id: SubscriptionId, settlement: Settlement) -> JobOutcome {
        match settlement {
            Settlement::Confirmed(receipt, token_deducted) => {
                let at = self.clock.now();
                tracing::info!(
                    operation = %receipt.handle,
                    transaction = ?receipt.transaction_hash,
                    actual_gas_used = %receipt.actual_gas_used,
                    actual_gas_cost = %receipt.actual_gas_cost,
                    token_deducted = ?token_deducted,
                    confirmed_at = %at,
                    "payment confirmed"
                );
                match self.store.record_outcome(id, Outcome::Confirmed { at }).await {
                    Ok(()) => JobOutcome::Confirmed {
                        handle: receipt.handle,
                        at,
                        token_deducted,
                    },
                    Err(e) => {
                        tracing::error!(reason = %FailureReason::StoreError, operation = %receipt.handle, error = %e, "confirmed payment could not be recorded");
                        JobOutcome::Failed {
                            reason: FailureReason::StoreError,
                        }
                    }
                }
            }
            Settlement::Failed(error) => {
                let reason = error.reason();
                tracing::warn!(%reason, error = %error, "payment cycle failed");
                if let Err(e) = self.store.record_outcome(id, Outcome::Failed).await {
                    tracing::error!(reason = %FailureReason::StoreError, error = %e, "failed to release subscription");
                }
                JobOutcome::Failed { reason }
            }
            Settlement::Unresolved(handle, error) => {
                let reason = error.reason();
                tracing::warn!(%reason, operation = %handle, error = %error, "operation outcome unknown, deferring to reconciliation");
                if let Err(e) = self.store.mark_unresolved(id).await {
                    tracing::error!(reason = %FailureReason::StoreError, operation = %handle, error = %e, "failed to mark operation unresolved");
                }
                JobOutcome::Unresolved { handle, reason }
            }
        }
    }

    /// Settles subscriptions whose last operation has an unknown outcome.
    ///
    /// Included and successful operations count as the cycle's payment (no
    /// resubmission). Reverted or dropped ones leave the subscription due.
    /// Operations the relay still holds are left for the next call.
    /// Returns how many subscriptions were settled.
    pub async fn reconcile(&self) -> usize {
        let unresolved = match self.store.list_unresolved().await {
            Ok(unresolved) => unresolved,
            Err(e) => {
                tracing::error!(reason = %FailureReason::StoreError, error = %e, "failed to list unresolved subscriptions");
                return 0;
            }
        };

        let mut settled = 0;
        for subscription in unresolved {
            let Some(handle) = subscription
                .pending_execution
                .as_ref()
                .and_then(|pending| pending.operation())
            else {
                continue;
            };
            let id = subscription.id;
            let outcome = match self.relay.status(handle).await {
                Ok(OperationStatus::Included(receipt)) if receipt.success => {
                    let at = self.clock.now();
                    tracing::info!(subscription = %id, operation = %handle, transaction = ?receipt.transaction_hash, confirmed_at = %at, "reconciled: payment landed");
                    Outcome::Confirmed { at }
                }
                Ok(OperationStatus::Included(receipt)) => {
                    tracing::warn!(subscription = %id, operation = %handle, reason = %FailureReason::OnChainRevert, revert = ?receipt.reason, "reconciled: operation reverted");
                    Outcome::Failed
                }
                Ok(OperationStatus::Unknown) => {
                    tracing::warn!(subscription = %id, operation = %handle, reason = %FailureReason::RelayTimeout, "reconciled: operation dropped");
                    Outcome::Failed
                }
                Ok(OperationStatus::Pending) => {
                    tracing::debug!(subscription = %id, operation = %handle, "still pending");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(subscription = %id, operation = %handle, error = %e, "status check failed, retrying next tick");
                    continue;
                }
            };
            match self.store.record_outcome(id, outcome).await {
                Ok(()) => settled += 1,
                Err(e) => {
                    tracing::error!(subscription = %id, reason = %FailureReason::StoreError, error = %e, "failed to record reconciled outcome");
                }
            }
        }
        settled
    }

    /// Startup recovery: drops claims that never reached the relay and turns
    /// submitted ones into unresolved, for [`reconcile`](Self::reconcile) to settle.
    ///
    /// # Errors
    ///
    /// Propagates the store's error.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let touched = self.store.recover().await?;
        if touched > 0 {
            tracing::info!(touched, "recovered in-flight subscriptions");
        }
        Ok(touched)
    }
}
