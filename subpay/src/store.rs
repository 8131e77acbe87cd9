//! Subscription storage abstraction.
//!
//! The engine never touches storage directly; it goes through
//! [`SubscriptionStore`], whose guard operations ([`mark_executing`],
//! [`attach_operation`], [`record_outcome`]) must each be a single atomic
//! mutation so the timer and the trigger listener cannot both dispatch the
//! same subscription.
//!
//! [`MemoryStore`] is the bundled implementation. Entry-level atomicity comes
//! from [`DashMap`]'s per-shard locking: every guard operation holds the
//! entry's write lock for the whole check-and-set.
//!
//! [`mark_executing`]: SubscriptionStore::mark_executing
//! [`attach_operation`]: SubscriptionStore::attach_operation
//! [`record_outcome`]: SubscriptionStore::record_outcome

use alloy_primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::operation::OperationHandle;
use crate::subscription::{NewSubscription, Outcome, PendingExecution, Subscription, SubscriptionId};
use crate::timestamp::UnixTimestamp;

/// Errors surfaced by a [`SubscriptionStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("subscription {0} not found")]
    NotFound(SubscriptionId),
    /// The record exists but is not in the state the call expects.
    #[error("subscription {id}: {message}")]
    InvalidState {
        /// Affected subscription.
        id: SubscriptionId,
        /// What was wrong.
        message: &'static str,
    },
    /// The record is malformed (e.g. zero interval).
    #[error("invalid subscription: {0}")]
    Invalid(&'static str),
    /// Backend-specific failure.
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Durable owner of subscription records.
///
/// The store is the single writer of `last_payment_at`, `active` and
/// `pending_execution`.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Creates a subscription. `last_payment_at` starts at `now`.
    async fn create(
        &self,
        new: NewSubscription,
        now: UnixTimestamp,
    ) -> Result<Subscription, StoreError>;

    /// Fetches one record.
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError>;

    /// Active subscriptions with no in-flight execution whose interval has
    /// elapsed at `now`.
    async fn list_due(&self, now: UnixTimestamp) -> Result<Vec<Subscription>, StoreError>;

    /// All subscriptions (active or not) paid by `payer`.
    async fn list_by_payer(&self, payer: Address) -> Result<Vec<Subscription>, StoreError>;

    /// Subscriptions whose last operation is [`PendingExecution::Unresolved`].
    async fn list_unresolved(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Atomically re-checks eligibility at `now` and sets the guard.
    ///
    /// Returns `false` when the subscription is inactive, not yet due, or
    /// already has a pending execution. At most one concurrent caller per id
    /// ever observes `true` until the guard is cleared.
    async fn mark_executing(
        &self,
        id: SubscriptionId,
        now: UnixTimestamp,
    ) -> Result<bool, StoreError>;

    /// Records the operation reference on a guarded subscription.
    async fn attach_operation(
        &self,
        id: SubscriptionId,
        handle: OperationHandle,
    ) -> Result<(), StoreError>;

    /// Releases job ownership of a submitted operation whose outcome is unknown.
    async fn mark_unresolved(&self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Clears the guard; on [`Outcome::Confirmed`] also advances `last_payment_at`.
    async fn record_outcome(&self, id: SubscriptionId, outcome: Outcome)
    -> Result<(), StoreError>;

    /// Permanently deactivates a subscription. An in-flight job is not affected.
    async fn cancel(&self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Startup reconciliation after a crash: never-submitted guards are
    /// dropped, submitted ones become unresolved. Returns how many records
    /// were touched.
    async fn recover(&self) -> Result<usize, StoreError>;
}

/// In-process [`SubscriptionStore`].
#[derive(Debug)]
pub struct MemoryStore {
    records: DashMap<SubscriptionId, Subscription>,
    next_id: AtomicU64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store. Ids start at `1`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn select(&self, predicate: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let mut selected: Vec<Subscription> = self
            .records
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        selected.sort_by_key(|s| s.id);
        selected
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn create(
        &self,
        new: NewSubscription,
        now: UnixTimestamp,
    ) -> Result<Subscription, StoreError> {
        if new.interval_seconds == 0 {
            return Err(StoreError::Invalid("interval_seconds must be positive"));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let subscription = Subscription {
            id,
            payer_account: new.payer_account,
            amount: new.amount,
            interval_seconds: new.interval_seconds,
            last_payment_at: now,
            active: true,
            pending_execution: None,
            description: new.description,
        };
        self.records.insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_due(&self, now: UnixTimestamp) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.select(|s| s.is_due(now)))
    }

    async fn list_by_payer(&self, payer: Address) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.select(|s| s.payer_account == payer))
    }

    async fn list_unresolved(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.select(|s| {
            matches!(s.pending_execution, Some(PendingExecution::Unresolved(_)))
        }))
    }

    async fn mark_executing(
        &self,
        id: SubscriptionId,
        now: UnixTimestamp,
    ) -> Result<bool, StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if !entry.is_due(now) {
            return Ok(false);
        }
        entry.pending_execution = Some(PendingExecution::Dispatched);
        Ok(true)
    }

    async fn attach_operation(
        &self,
        id: SubscriptionId,
        handle: OperationHandle,
    ) -> Result<(), StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match entry.pending_execution {
            Some(PendingExecution::Dispatched | PendingExecution::Submitted(_)) => {
                entry.pending_execution = Some(PendingExecution::Submitted(handle));
                Ok(())
            }
            _ => Err(StoreError::InvalidState {
                id,
                message: "attach_operation without an owning job",
            }),
        }
    }

    async fn mark_unresolved(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        match entry.pending_execution {
            Some(PendingExecution::Submitted(handle) | PendingExecution::Unresolved(handle)) => {
                entry.pending_execution = Some(PendingExecution::Unresolved(handle));
                Ok(())
            }
            _ => Err(StoreError::InvalidState {
                id,
                message: "mark_unresolved without a submitted operation",
            }),
        }
    }

    async fn record_outcome(
        &self,
        id: SubscriptionId,
        outcome: Outcome,
    ) -> Result<(), StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if let Outcome::Confirmed { at } = outcome {
            entry.last_payment_at = at;
        }
        entry.pending_execution = None;
        Ok(())
    }

    async fn cancel(&self, id: SubscriptionId) -> Result<(), StoreError> {
        let mut entry = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        entry.active = false;
        Ok(())
    }

    async fn recover(&self) -> Result<usize, StoreError> {
        let mut touched = 0;
        for mut entry in self.records.iter_mut() {
            match entry.pending_execution {
                Some(PendingExecution::Dispatched) => {
                    entry.pending_execution = None;
                    touched += 1;
                }
                Some(PendingExecution::Submitted(handle)) => {
                    entry.pending_execution = Some(PendingExecution::Unresolved(handle));
                    touched += 1;
                }
                Some(PendingExecution::Unresolved(_)) | None => {}
            }
        }
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{B256, U256};
    use std::sync::Arc;

    fn daily(payer: u8) -> NewSubscription {
        NewSubscription {
            payer_account: Address::repeat_byte(payer),
            amount: U256::from(1_000_000u64),
            interval_seconds: 86_400,
            description: None,
        }
    }

    const T0: UnixTimestamp = UnixTimestamp::from_secs(0);
    const DAY: UnixTimestamp = UnixTimestamp::from_secs(86_400);

    #[tokio::test]
    async fn test_create_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let a = store.create(daily(1), T0).await.unwrap();
        let b = store.create(daily(2), T0).await.unwrap();
        assert_eq!(a.id, SubscriptionId(1));
        assert_eq!(b.id, SubscriptionId(2));
        assert_eq!(a.last_payment_at, T0);
        assert!(a.active);
    }

    #[tokio::test]
    async fn test_default_store_never_reuses_ids() {
        let store = MemoryStore::default();
        let a = store.create(daily(1), T0).await.unwrap();
        let b = store.create(daily(2), T0).await.unwrap();
        assert_eq!(a.id, SubscriptionId(1));
        assert_eq!(b.id, SubscriptionId(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(a.id).await.unwrap().unwrap().payer_account, a.payer_account);
    }

    #[tokio::test]
    async fn test_create_rejects_zero_interval() {
        let store = MemoryStore::new();
        let mut new = daily(1);
        new.interval_seconds = 0;
        assert!(matches!(
            store.create(new, T0).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_list_due_respects_interval() {
        let store = MemoryStore::new();
        store.create(daily(1), T0).await.unwrap();
        assert!(store.list_due(UnixTimestamp::from_secs(43_200)).await.unwrap().is_empty());
        assert_eq!(store.list_due(DAY).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_is_permanent() {
        let store = MemoryStore::new();
        let sub = store.create(daily(1), T0).await.unwrap();
        store.cancel(sub.id).await.unwrap();
        for days in 1..5 {
            let now = UnixTimestamp::from_secs(days * 86_400);
            assert!(store.list_due(now).await.unwrap().is_empty());
            assert!(!store.mark_executing(sub.id, now).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_mark_executing_is_exclusive() {
        let store = Arc::new(MemoryStore::new());
        let sub = store.create(daily(1), T0).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                store.mark_executing(sub.id, DAY).await.unwrap()
            }));
        }
        let mut accepted = 0;
        for task in tasks {
            if task.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);
        assert!(store.list_due(DAY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_confirmed_outcome_advances_to_confirmation_time() {
        let store = MemoryStore::new();
        let sub = store.create(daily(1), T0).await.unwrap();
        assert!(store.mark_executing(sub.id, DAY).await.unwrap());
        let confirmed_at = UnixTimestamp::from_secs(86_400 + 37);
        store
            .record_outcome(sub.id, Outcome::Confirmed { at: confirmed_at })
            .await
            .unwrap();
        let after = store.get(sub.id).await.unwrap().unwrap();
        assert_eq!(after.last_payment_at, confirmed_at);
        assert_eq!(after.pending_execution, None);
    }

    #[tokio::test]
    async fn test_failed_outcome_leaves_record_due() {
        let store = MemoryStore::new();
        let sub = store.create(daily(1), T0).await.unwrap();
        assert!(store.mark_executing(sub.id, DAY).await.unwrap());
        store.record_outcome(sub.id, Outcome::Failed).await.unwrap();
        let after = store.get(sub.id).await.unwrap().unwrap();
        assert_eq!(after.last_payment_at, T0);
        assert!(after.is_due(DAY));
    }

    #[tokio::test]
    async fn test_unresolved_blocks_dispatch_until_reconciled() {
        let store = MemoryStore::new();
        let sub = store.create(daily(1), T0).await.unwrap();
        let handle = OperationHandle(B256::repeat_byte(7));
        assert!(store.mark_executing(sub.id, DAY).await.unwrap());
        store.attach_operation(sub.id, handle).await.unwrap();
        store.mark_unresolved(sub.id).await.unwrap();

        assert!(!store.mark_executing(sub.id, DAY).await.unwrap());
        let unresolved = store.list_unresolved().await.unwrap();
        assert_eq!(unresolved.len(), 1);
        assert_eq!(
            unresolved[0].pending_execution,
            Some(PendingExecution::Unresolved(handle))
        );
    }

    #[tokio::test]
    async fn test_attach_requires_guard() {
        let store = MemoryStore::new();
        let sub = store.create(daily(1), T0).await.unwrap();
        let result = store
            .attach_operation(sub.id, OperationHandle(B256::ZERO))
            .await;
        assert!(matches!(result, Err(StoreError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_recover_after_crash() {
        let store = MemoryStore::new();
        let a = store.create(daily(1), T0).await.unwrap();
        let b = store.create(daily(2), T0).await.unwrap();
        let handle = OperationHandle(B256::repeat_byte(9));
        assert!(store.mark_executing(a.id, DAY).await.unwrap());
        assert!(store.mark_executing(b.id, DAY).await.unwrap());
        store.attach_operation(b.id, handle).await.unwrap();

        assert_eq!(store.recover().await.unwrap(), 2);
        let a = store.get(a.id).await.unwrap().unwrap();
        let b = store.get(b.id).await.unwrap().unwrap();
        assert_eq!(a.pending_execution, None);
        assert_eq!(
            b.pending_execution,
            Some(PendingExecution::Unresolved(handle))
        );
    }

    #[tokio::test]
    async fn test_missing_id_is_not_found() {
        let store = MemoryStore::new();
        let result = store.mark_executing(SubscriptionId(42), DAY).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }
}
