//! In-memory fakes for engine tests.

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::account::{AccountError, AccountRegistry, SmartAccount};
use crate::authorization::{AuthorizationError, Authorizer, PERMIT_DEADLINE, SignedAuthorization};
use crate::calls::CallFactory;
use crate::config::{EngineConfig, SponsorshipConfig};
use crate::executor::{Collaborators, Executor};
use crate::gas::{FeeOracle, FeeQuoteError, SponsorOverhead};
use crate::listener::{TriggerError, TriggerEvent, TriggerSource};
use crate::operation::{
    AccountDeployment, Call, FeeQuote, OperationHandle, OperationReceipt, OperationStatus,
    SponsoredOperation,
};
use crate::relay::{Relay, RelayError};
use crate::scheduler::Scheduler;
use crate::store::{MemoryStore, SubscriptionStore};
use crate::subscription::{NewSubscription, Subscription};
use crate::timestamp::{Clock, ManualClock, UnixTimestamp};

pub fn operation_hash(op: &SponsoredOperation) -> B256 {
    let mut preimage = Vec::new();
    preimage.extend_from_slice(op.sender.as_slice());
    preimage.extend_from_slice(&op.nonce.to_be_bytes::<32>());
    preimage.extend_from_slice(&op.call_data);
    preimage.extend_from_slice(&op.sponsorship_data);
    keccak256(preimage)
}

pub struct FakeAccount {
    address: Address,
    nonce: AtomicU64,
}

impl FakeAccount {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            nonce: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl SmartAccount for FakeAccount {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_digest(&self, digest: B256) -> Result<Bytes, AccountError> {
        let mut sig = digest.to_vec();
        sig.extend_from_slice(&[0x22; 32]);
        sig.push(0x1b);
        Ok(sig.into())
    }

    async fn operation_nonce(&self) -> Result<U256, AccountError> {
        Ok(U256::from(self.nonce.fetch_add(1, Ordering::SeqCst)))
    }

    async fn deployment(&self) -> Result<Option<AccountDeployment>, AccountError> {
        Ok(None)
    }

    fn encode_calls(&self, calls: &[Call]) -> Result<Bytes, AccountError> {
        let mut out = Vec::new();
        for call in calls {
            out.extend_from_slice(call.target.as_slice());
            out.extend_from_slice(&call.data);
        }
        Ok(out.into())
    }

    fn operation_hash(&self, op: &SponsoredOperation) -> B256 {
        operation_hash(op)
    }

    async fn sign_operation(&self, op: &SponsoredOperation) -> Result<Bytes, AccountError> {
        self.sign_typed_digest(operation_hash(op)).await
    }
}

/// Balance every payer holds unless a test scripts otherwise.
pub const FUNDED: u64 = 1_000_000_000;

#[derive(Default)]
pub struct FakeAuthorizer {
    nonce: AtomicU64,
    last: Mutex<Option<SignedAuthorization>>,
    balances: Mutex<VecDeque<Result<U256, AuthorizationError>>>,
}

impl FakeAuthorizer {
    /// Queues the answers of the next balance reads.
    pub fn script_balances(&self, balances: Vec<Result<U256, AuthorizationError>>) {
        self.balances.lock().unwrap().extend(balances);
    }

    pub fn set_nonce(&self, nonce: u64) {
        self.nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn last(&self) -> Option<SignedAuthorization> {
        self.last.lock().unwrap().clone()
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    async fn balance(&self, _owner: Address) -> Result<U256, AuthorizationError> {
        self.balances
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(U256::from(FUNDED)))
    }

    async fn authorize(
        &self,
        account: &dyn SmartAccount,
        spender: Address,
        value: U256,
    ) -> Result<SignedAuthorization, AuthorizationError> {
        let owner = account.address();
        let nonce = U256::from(self.nonce.load(Ordering::SeqCst));
        let mut preimage = Vec::new();
        preimage.extend_from_slice(owner.as_slice());
        preimage.extend_from_slice(spender.as_slice());
        preimage.extend_from_slice(&value.to_be_bytes::<32>());
        preimage.extend_from_slice(&nonce.to_be_bytes::<32>());
        let signature = account
            .sign_typed_digest(keccak256(preimage))
            .await
            .map_err(|e| AuthorizationError::Signing(e.to_string()))?;
        let authorization = SignedAuthorization {
            owner,
            spender,
            value,
            nonce,
            deadline: PERMIT_DEADLINE,
            signature,
        };
        *self.last.lock().unwrap() = Some(authorization.clone());
        Ok(authorization)
    }
}

pub struct ScriptedOracle {
    script: Mutex<VecDeque<Result<FeeQuote, FeeQuoteError>>>,
    fallback: Option<FeeQuote>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn new(script: Vec<Result<FeeQuote, FeeQuoteError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback: Some(FeeQuote {
                max_fee_per_gas: 100_000_000,
                max_priority_fee_per_gas: 1_000_000,
            }),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn outage() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeOracle for ScriptedOracle {
    async fn fee_quote(&self) -> Result<FeeQuote, FeeQuoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(next) = self.script.lock().unwrap().pop_front() {
            return next;
        }
        self.fallback
            .ok_or_else(|| FeeQuoteError::Unavailable("oracle down".into()))
    }
}

pub struct FixedOverhead(pub u128);

#[async_trait]
impl SponsorOverhead for FixedOverhead {
    async fn declared_overhead(&self, _sponsor: Address) -> Result<u128, FeeQuoteError> {
        Ok(self.0)
    }
}

pub struct FixedCalls(pub Address);

impl CallFactory for FixedCalls {
    fn payment_calls(&self, subscription: &Subscription) -> Vec<Call> {
        let mut data = vec![0xde, 0xad, 0xbe, 0xef];
        data.extend_from_slice(subscription.payer_account.as_slice());
        vec![Call::new(self.0, data.into())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Accept and include successfully.
    Confirm,
    /// Accept and include with a revert.
    Revert,
    /// Refuse at submission.
    Reject,
    /// Accept and keep pending until told otherwise.
    Hold,
    /// Fail at the transport level.
    TransportError,
}

pub struct FakeRelay {
    mode: RelayMode,
    submitted: Mutex<Vec<(OperationHandle, SponsoredOperation)>>,
    statuses: Mutex<HashMap<OperationHandle, OperationStatus>>,
}

impl FakeRelay {
    pub fn new(mode: RelayMode) -> Self {
        Self {
            mode,
            submitted: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn submissions(&self) -> Vec<SponsoredOperation> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|(_, op)| op.clone())
            .collect()
    }

    pub fn handles(&self) -> Vec<OperationHandle> {
        self.submitted.lock().unwrap().iter().map(|(h, _)| *h).collect()
    }

    pub fn include(&self, handle: OperationHandle, success: bool) {
        let receipt = OperationReceipt {
            handle,
            success,
            actual_gas_used: U256::from(120_000u64),
            actual_gas_cost: U256::from(12_000_000_000_000u64),
            transaction_hash: Some(B256::repeat_byte(0x7e)),
            reason: (!success).then(|| "execution reverted".to_owned()),
        };
        self.statuses
            .lock()
            .unwrap()
            .insert(handle, OperationStatus::Included(receipt));
    }

    pub fn drop_operation(&self, handle: OperationHandle) {
        self.statuses
            .lock()
            .unwrap()
            .insert(handle, OperationStatus::Unknown);
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn submit(&self, op: &SponsoredOperation) -> Result<OperationHandle, RelayError> {
        let handle = OperationHandle(operation_hash(op));
        match self.mode {
            RelayMode::Reject => return Err(RelayError::Rejected("AA33 reverted".into())),
            RelayMode::TransportError => {
                return Err(RelayError::Transport("connection reset".into()));
            }
            RelayMode::Confirm => self.include(handle, true),
            RelayMode::Revert => self.include(handle, false),
            RelayMode::Hold => {
                self.statuses
                    .lock()
                    .unwrap()
                    .insert(handle, OperationStatus::Pending);
            }
        }
        self.submitted.lock().unwrap().push((handle, op.clone()));
        Ok(handle)
    }

    async fn status(&self, handle: OperationHandle) -> Result<OperationStatus, RelayError> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&handle)
            .cloned()
            .unwrap_or(OperationStatus::Unknown))
    }
}

pub struct ScriptedSource {
    script: VecDeque<Result<Vec<TriggerEvent>, TriggerError>>,
    resubscribes: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(script: Vec<Result<Vec<TriggerEvent>, TriggerError>>) -> Self {
        Self {
            script: script.into(),
            resubscribes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn resubscribes(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.resubscribes)
    }
}

#[async_trait]
impl TriggerSource for ScriptedSource {
    async fn next_batch(&mut self) -> Result<Vec<TriggerEvent>, TriggerError> {
        match self.script.pop_front() {
            Some(next) => next,
            None => std::future::pending().await,
        }
    }

    async fn resubscribe(&mut self) -> Result<(), TriggerError> {
        self.resubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A fully wired engine over fakes, starting at t=0.
pub struct Harness {
    pub payer: Address,
    pub config: EngineConfig,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryStore>,
    pub relay: Arc<FakeRelay>,
    pub authorizer: Arc<FakeAuthorizer>,
    pub accounts: Arc<AccountRegistry>,
    pub executor: Arc<Executor>,
}

impl Harness {
    pub fn new(mode: RelayMode) -> Self {
        Self::build(mode, ScriptedOracle::new(Vec::new()))
    }

    pub fn with_oracle_outage(mode: RelayMode) -> Self {
        Self::build(mode, ScriptedOracle::outage())
    }

    fn build(mode: RelayMode, oracle: ScriptedOracle) -> Self {
        let payer = Address::repeat_byte(0xaa);
        let config = EngineConfig::new(SponsorshipConfig::new(
            Address::repeat_byte(0x75),
            Address::repeat_byte(0x31),
        ));
        let clock = Arc::new(ManualClock::new(UnixTimestamp::from_secs(0)));
        let store = Arc::new(MemoryStore::new());
        let relay = Arc::new(FakeRelay::new(mode));
        let authorizer = Arc::new(FakeAuthorizer::default());
        let accounts = Arc::new(AccountRegistry::new());
        accounts.register(Arc::new(FakeAccount::new(payer)));

        let executor = Arc::new(Executor::new(
            Collaborators {
                store: store.clone(),
                accounts: accounts.clone(),
                authorizer: authorizer.clone(),
                fee_oracle: Arc::new(oracle),
                sponsor_overhead: Arc::new(FixedOverhead(15_000)),
                relay: relay.clone(),
                calls: Arc::new(FixedCalls(Address::repeat_byte(0xcc))),
                clock: clock.clone(),
            },
            &config,
        ));
        Self {
            payer,
            config,
            clock,
            store,
            relay,
            authorizer,
            accounts,
            executor,
        }
    }

    /// Registers a signing account for another payer.
    pub fn add_account(&self, payer: Address) {
        self.accounts.register(Arc::new(FakeAccount::new(payer)));
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.executor),
            self.config.tick_interval(),
            self.config.max_concurrent_jobs,
        )
    }

    pub async fn subscribe(&self, interval_seconds: u64) -> Subscription {
        self.subscribe_for(self.payer, interval_seconds).await
    }

    pub async fn subscribe_for(&self, payer: Address, interval_seconds: u64) -> Subscription {
        self.store
            .create(
                NewSubscription {
                    payer_account: payer,
                    amount: U256::from(1_000_000u64),
                    interval_seconds,
                    description: Some("daily".into()),
                },
                self.clock.now(),
            )
            .await
            .unwrap()
    }
}
