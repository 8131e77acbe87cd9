//! Log-polling trigger source.
//!
//! Polls `eth_getLogs` for one event on one contract over a block cursor.
//! The cursor only advances after a successful read, so a failed poll is
//! retried over the same range; replaying a range is harmless because every
//! dispatch still has to win the store's claim.
//!
//! Each query spans at most `max_block_range` blocks, since nodes refuse
//! wide `eth_getLogs` ranges. While the cursor trails the head the source
//! reads chunk after chunk without waiting for the poll interval.

use alloy_primitives::{Address, B256, keccak256};
use alloy_provider::Provider;
use alloy_rpc_types_eth::{Filter, Log};
use async_trait::async_trait;
use std::time::Duration;
use subpay::listener::{TriggerError, TriggerEvent, TriggerSource};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::Instrument;

/// Widest `eth_getLogs` span requested by default.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 2_000;

/// Streams trigger events from contract logs.
#[derive(Debug)]
pub struct LogTriggerSource<P> {
    provider: P,
    contract: Address,
    topic0: B256,
    poll_interval: Duration,
    max_block_range: u64,
    next_block: Option<u64>,
    catching_up: bool,
    ticker: Option<Interval>,
}

impl<P: Provider> LogTriggerSource<P> {
    /// Watches `contract` for the event with canonical `signature`, e.g. `Ping()`.
    pub fn new(provider: P, contract: Address, signature: &str) -> Self {
        Self {
            provider,
            contract,
            topic0: keccak256(signature.as_bytes()),
            poll_interval: Duration::from_secs(4),
            max_block_range: DEFAULT_MAX_BLOCK_RANGE,
            next_block: None,
            catching_up: false,
            ticker: None,
        }
    }

    /// Starts reading at `block` instead of the current head.
    #[must_use]
    pub const fn from_block(mut self, block: u64) -> Self {
        self.next_block = Some(block);
        self
    }

    /// Sets the delay between polls.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Caps each log query at `blocks` blocks (at least one).
    #[must_use]
    pub fn with_max_block_range(mut self, blocks: u64) -> Self {
        self.max_block_range = blocks.max(1);
        self
    }

    /// Next block to be read, once known.
    pub const fn cursor(&self) -> Option<u64> {
        self.next_block
    }

    async fn poll(&mut self) -> Result<Vec<TriggerEvent>, TriggerError> {
        let head = self
            .provider
            .get_block_number()
            .into_future()
            .instrument(tracing::info_span!("fetch_block_number", otel.kind = "client"))
            .await
            .map_err(|e| TriggerError::Stream(e.to_string()))?;
        let from = *self.next_block.get_or_insert(head);
        if from > head {
            self.catching_up = false;
            return Ok(Vec::new());
        }
        let to = head.min(from.saturating_add(self.max_block_range - 1));

        let filter = Filter::new()
            .address(self.contract)
            .event_signature(self.topic0)
            .from_block(from)
            .to_block(to);
        let logs = self
            .provider
            .get_logs(&filter)
            .instrument(tracing::info_span!("fetch_trigger_logs", from, to, otel.kind = "client"))
            .await
            .map_err(|e| TriggerError::Stream(e.to_string()))?;
        self.next_block = Some(to + 1);
        self.catching_up = to < head;
        if self.catching_up {
            tracing::debug!(cursor = to + 1, head, "trigger cursor behind head");
        }

        Ok(logs.iter().filter_map(decode).collect())
    }
}

/// Reads the payer from the first indexed topic, when there is one.
fn decode(log: &Log) -> Option<TriggerEvent> {
    let id = log.transaction_hash.unwrap_or_default();
    let payer = match log.topics().get(1) {
        None => None,
        Some(topic) if topic[..12].iter().all(|b| *b == 0) => Some(Address::from_word(*topic)),
        Some(topic) => {
            tracing::warn!(event = %id, %topic, "ignoring trigger with malformed payer topic");
            return None;
        }
    };
    Some(TriggerEvent { id, payer })
}

#[async_trait]
impl<P: Provider> TriggerSource for LogTriggerSource<P> {
    async fn next_batch(&mut self) -> Result<Vec<TriggerEvent>, TriggerError> {
        let poll_interval = self.poll_interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        if !self.catching_up {
            ticker.tick().await;
        }
        self.poll().await
    }

    async fn resubscribe(&mut self) -> Result<(), TriggerError> {
        tracing::info!(contract = %self.contract, cursor = ?self.next_block, "resuming log polling");
        Ok(())
    }
}
