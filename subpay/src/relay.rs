//! Relay (bundler) seam.
//!
//! Submission returns as soon as the relay accepts the operation; inclusion is
//! observed separately through [`Relay::status`], either by
//! [`await_receipt`] inside a job or by reconciliation on a later tick.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

use crate::operation::{OperationHandle, OperationReceipt, OperationStatus, SponsoredOperation};

/// Relay-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Refused before inclusion (malformed, unfunded sponsor, stale nonce).
    #[error("relay rejected operation: {0}")]
    Rejected(String),
    /// No receipt within the bounded wait. The operation may still land.
    #[error("no receipt for operation {0} within timeout")]
    Timeout(OperationHandle),
    /// The relay could not be reached; whether it saw the operation is unknown.
    #[error("relay transport error: {0}")]
    Transport(String),
}

/// Accepts sponsored operations and reports on their inclusion.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Hands `op` to the relay and returns its tracking handle.
    async fn submit(&self, op: &SponsoredOperation) -> Result<OperationHandle, RelayError>;

    /// Current knowledge about `handle`.
    async fn status(&self, handle: OperationHandle) -> Result<OperationStatus, RelayError>;
}

/// Polls `relay` until `handle` is included or `timeout` elapses.
///
/// Transport errors while polling are logged and polling continues; only the
/// deadline ends the wait early. An operation the relay no longer knows is
/// still waited on, since a bundle can land before the relay's index catches up.
///
/// # Errors
///
/// [`RelayError::Timeout`] when the deadline passes without inclusion.
pub async fn await_receipt(
    relay: &dyn Relay,
    handle: OperationHandle,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<OperationReceipt, RelayError> {
    let deadline = Instant::now() + timeout;
    loop {
        match relay.status(handle).await {
            Ok(OperationStatus::Included(receipt)) => return Ok(receipt),
            Ok(OperationStatus::Pending | OperationStatus::Unknown) => {}
            Err(e) => tracing::warn!(operation = %handle, error = %e, "receipt poll failed"),
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(RelayError::Timeout(handle));
        }
        tokio::time::sleep(poll_interval.min(deadline - now)).await;
    }
}
