#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Recurring sponsored-payment execution engine.
//!
//! Subscriptions are paid from a smart account that holds no native gas
//! token. Each cycle signs a capped token-spend authorization for a fee
//! sponsor, packs it into the sponsor's payload, prices the operation and
//! submits it through a relay. The engine is chain-agnostic; the EVM binding
//! lives in `subpay-evm`.
//!
//! # Overview
//!
//! Two drivers feed the same job path:
//!
//! - [`scheduler::Scheduler`] ticks periodically and dispatches every due subscription
//! - [`listener::Listener`] dispatches on on-chain trigger events
//!
//! Both claim a subscription through [`store::SubscriptionStore::mark_executing`]
//! before any network call, so at most one job per subscription is ever in
//! flight. Operations whose outcome is unknown after submission are settled by
//! [`executor::Executor::reconcile`] rather than resubmitted.
//!
//! # Modules
//!
//! - [`subscription`] - Subscription records and due-state
//! - [`store`] - Storage abstraction and the in-memory store
//! - [`authorization`] - Token-spend permits
//! - [`sponsorship`] - Sponsor payload encoding
//! - [`gas`] - Gas limits and fee quotes
//! - [`operation`] - Sponsored operations and receipts
//! - [`relay`] - Relay seam and receipt polling
//! - [`account`] - Smart account seam
//! - [`executor`] - Per-subscription jobs
//! - [`scheduler`] - Periodic driver
//! - [`listener`] - Event-driven driver

pub mod account;
pub mod authorization;
pub mod backoff;
pub mod calls;
pub mod config;
pub mod error;
pub mod executor;
pub mod gas;
pub mod listener;
pub mod operation;
pub mod relay;
pub mod scheduler;
pub mod sponsorship;
pub mod store;
pub mod subscription;
pub mod timestamp;

#[cfg(test)]
mod testing;

pub use account::{AccountError, AccountRegistry, SmartAccount};
pub use authorization::{AuthorizationError, Authorizer, SignedAuthorization};
pub use calls::CallFactory;
pub use config::{EngineConfig, SponsorshipConfig};
pub use error::{EncodingError, ExecutionError, FailureReason};
pub use executor::{Collaborators, Executor, JobOutcome, JobReport, Trigger};
pub use gas::{FeeOracle, FeeQuoteError, GasEstimator, GasPolicy, SponsorOverhead};
pub use listener::{Listener, TriggerError, TriggerEvent, TriggerSource};
pub use operation::{
    AccountDeployment, Call, FeeQuote, GasLimits, OperationHandle, OperationReceipt,
    OperationState, OperationStatus, SponsoredOperation,
};
pub use relay::{Relay, RelayError};
pub use scheduler::{Scheduler, TickReport};
pub use store::{MemoryStore, StoreError, SubscriptionStore};
pub use subscription::{NewSubscription, Outcome, PendingExecution, Subscription, SubscriptionId};
pub use timestamp::{Clock, ManualClock, SystemClock, UnixTimestamp};
