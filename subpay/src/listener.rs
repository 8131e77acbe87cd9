//! On-chain trigger listener.
//!
//! Turns events from a [`TriggerSource`] into jobs on the scheduler's dispatch
//! path. Replayed or duplicate events are harmless: every job still has to win
//! the store's claim, which fails while a payment is in flight or not yet due.
//!
//! A failing source is resubscribed with exponential backoff. The listener
//! never stops on its own; only cancellation ends it.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::backoff::Backoff;
use crate::error::FailureReason;
use crate::executor::{JobReport, Trigger};
use crate::scheduler::Scheduler;
use crate::store::StoreError;
use crate::subscription::SubscriptionId;

/// Failures of an event stream.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    /// The stream disconnected or the node refused the query.
    #[error("trigger stream error: {0}")]
    Stream(String),
    /// An event could not be decoded.
    #[error("trigger decode error: {0}")]
    Decode(String),
}

/// A trigger observed on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    /// Identifies the log (transaction hash), for tracing.
    pub id: B256,
    /// Payer the event targets. `None` means "whatever is due".
    pub payer: Option<Address>,
}

/// A resumable stream of trigger events.
#[async_trait]
pub trait TriggerSource: Send {
    /// Waits for and returns the next batch of events (possibly empty).
    async fn next_batch(&mut self) -> Result<Vec<TriggerEvent>, TriggerError>;

    /// Re-establishes the stream after an error.
    async fn resubscribe(&mut self) -> Result<(), TriggerError> {
        Ok(())
    }
}

/// Feeds trigger events into a [`Scheduler`].
#[derive(Debug)]
pub struct Listener {
    scheduler: Arc<Scheduler>,
    backoff: Backoff,
}

impl Listener {
    /// Listener with a 1s to 60s resubscribe backoff.
    #[must_use]
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(60)),
        }
    }

    /// Overrides the resubscribe backoff.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff::new(initial, max);
        self
    }

    /// Dispatches the subscriptions implied by `event`.
    pub async fn handle(&self, event: TriggerEvent) -> Vec<JobReport> {
        self.handle_batch(&[event]).await
    }

    /// Dispatches every subscription implied by `events` as one concurrent job set.
    ///
    /// A subscription named by several events of the batch runs once.
    pub async fn handle_batch(&self, events: &[TriggerEvent]) -> Vec<JobReport> {
        let mut ids = BTreeSet::new();
        for event in events {
            match self.candidates(event).await {
                Ok(found) => {
                    tracing::info!(event = %event.id, payer = ?event.payer, candidates = found.len(), "trigger received");
                    ids.extend(found);
                }
                Err(e) => {
                    tracing::error!(event = %event.id, reason = %FailureReason::StoreError, error = %e, "failed to resolve trigger");
                }
            }
        }
        if ids.is_empty() {
            return Vec::new();
        }
        self.scheduler
            .dispatch(ids.into_iter().collect(), Trigger::Event)
            .await
    }

    async fn candidates(&self, event: &TriggerEvent) -> Result<Vec<SubscriptionId>, StoreError> {
        let executor = self.scheduler.executor();
        let store = executor.store();
        let subscriptions = match event.payer {
            Some(payer) => store
                .list_by_payer(payer)
                .await?
                .into_iter()
                .filter(|s| s.active)
                .collect::<Vec<_>>(),
            None => store.list_due(executor.clock().now()).await?,
        };
        Ok(subscriptions.into_iter().map(|s| s.id).collect())
    }

    /// Consumes `source` until `cancel` fires.
    pub async fn run<S: TriggerSource>(mut self, mut source: S, cancel: CancellationToken) {
        tracing::info!("trigger listener started");
        loop {
            let batch = tokio::select! {
                () = cancel.cancelled() => break,
                batch = source.next_batch() => batch,
            };
            match batch {
                Ok(events) => {
                    self.backoff.reset();
                    if events.is_empty() {
                        continue;
                    }
                    let reports = self.handle_batch(&events).await;
                    let succeeded = reports.iter().filter(|r| r.succeeded()).count();
                    tracing::info!(events = events.len(), dispatched = reports.len(), succeeded, "trigger batch handled");
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    tracing::warn!(error = %e, ?delay, "trigger stream failed, resubscribing");
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                    if let Err(e) = source.resubscribe().await {
                        tracing::warn!(error = %e, "resubscribe failed");
                    }
                }
            }
        }
        tracing::info!("trigger listener stopped");
    }
}
