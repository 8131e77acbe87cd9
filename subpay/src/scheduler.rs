//! Due-payment scheduler.
//!
//! Each tick reconciles unresolved operations, scans the store for due
//! subscriptions and runs one job per subscription with bounded concurrency.
//! The trigger listener feeds the same [`Scheduler::dispatch`] path, so the
//! store's claim guard is the only mutual exclusion between the two drivers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::FailureReason;
use crate::executor::{Executor, JobOutcome, JobReport, Trigger};
use crate::subscription::SubscriptionId;
use crate::timestamp::UnixTimestamp;

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// When the tick scanned the store.
    pub at: UnixTimestamp,
    /// Due subscriptions found.
    pub scanned: usize,
    /// Jobs actually started.
    pub dispatched: usize,
    /// Jobs that confirmed a payment.
    pub succeeded: usize,
    /// Jobs that failed or ended unresolved.
    pub failed: usize,
    /// Unresolved operations settled before the scan.
    pub reconciled: usize,
    /// Per-job results.
    pub jobs: Vec<JobReport>,
}

/// Drives due subscriptions through the executor.
#[derive(Debug)]
pub struct Scheduler {
    executor: Arc<Executor>,
    permits: Arc<Semaphore>,
    tick_interval: Duration,
    reports: watch::Sender<Option<TickReport>>,
}

impl Scheduler {
    /// Creates a scheduler running at most `max_concurrent_jobs` jobs at once.
    #[must_use]
    pub fn new(executor: Arc<Executor>, tick_interval: Duration, max_concurrent_jobs: usize) -> Self {
        let (reports, _) = watch::channel(None);
        Self {
            executor,
            permits: Arc::new(Semaphore::new(max_concurrent_jobs.max(1))),
            tick_interval,
            reports,
        }
    }

    /// The underlying executor.
    #[must_use]
    pub const fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Receives the latest tick report after every tick.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<TickReport>> {
        self.reports.subscribe()
    }

    /// Runs one job per id, concurrently and isolated from each other.
    ///
    /// Ids that are not eligible when claimed produce no report. A job that
    /// panics is logged and does not affect the others.
    pub async fn dispatch(&self, ids: Vec<SubscriptionId>, trigger: Trigger) -> Vec<JobReport> {
        let mut jobs = JoinSet::new();
        for id in ids {
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&self.permits);
            jobs.spawn(async move {
                let _permit = permits.acquire_owned().await.ok()?;
                executor.dispatch(id, trigger).await
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok(Some(report)) => reports.push(report),
                Ok(None) => {}
                Err(e) => tracing::error!(%trigger, error = %e, "execution job aborted"),
            }
        }
        reports.sort_by_key(|r| r.subscription);
        reports
    }

    /// One full tick: reconcile, scan, dispatch.
    pub async fn tick(&self) -> TickReport {
        let reconciled = self.executor.reconcile().await;
        let now = self.executor.clock().now();

        let due = match self.executor.store().list_due(now).await {
            Ok(due) => due,
            Err(e) => {
                tracing::error!(reason = %FailureReason::StoreError, error = %e, "failed to scan for due subscriptions");
                Vec::new()
            }
        };
        let scanned = due.len();
        let jobs = self
            .dispatch(due.into_iter().map(|s| s.id).collect(), Trigger::Timer)
            .await;

        let succeeded = jobs.iter().filter(|j| j.succeeded()).count();
        TickReport {
            at: now,
            scanned,
            dispatched: jobs.len(),
            succeeded,
            failed: jobs.len() - succeeded,
            reconciled,
            jobs,
        }
    }

    /// Ticks every `tick_interval` until `cancel` fires. The first tick runs
    /// immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(tick_interval = ?self.tick_interval, "scheduler started");

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.tick().await;
                    log_report(&report);
                    self.reports.send_replace(Some(report));
                }
            }
        }
        tracing::info!("scheduler stopped");
    }
}

fn log_report(report: &TickReport) {
    for job in &report.jobs {
        match &job.outcome {
            JobOutcome::Failed { reason } | JobOutcome::Unresolved { reason, .. } => {
                tracing::debug!(subscription = %job.subscription, %reason, "job did not confirm");
            }
            JobOutcome::Confirmed { .. } => {}
        }
    }
    tracing::info!(
        scanned = report.scanned,
        dispatched = report.dispatched,
        succeeded = report.succeeded,
        failed = report.failed,
        reconciled = report.reconciled,
        "tick complete"
    );
}
