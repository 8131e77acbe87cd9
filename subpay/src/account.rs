//! Smart accounts the engine pays from.

use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::operation::{AccountDeployment, Call, SponsoredOperation};

/// Failures raised by a [`SmartAccount`].
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    /// Chain state could not be read.
    #[error("account rpc error: {0}")]
    Rpc(String),
    /// The owner key could not sign.
    #[error("account signing error: {0}")]
    Signing(String),
    /// Calls could not be encoded for this account type.
    #[error("account encoding error: {0}")]
    Encoding(String),
}

/// A programmable account able to sign permits and sponsored operations.
#[async_trait]
pub trait SmartAccount: Send + Sync {
    /// On-chain address (counterfactual if not deployed yet).
    fn address(&self) -> Address;

    /// Signs a typed-data digest so that the account validates it via ERC-1271.
    ///
    /// Undeployed accounts may return a signature wrapped in a deployment
    /// envelope; callers unwrap it where the verifier requires a bare one.
    async fn sign_typed_digest(&self, digest: B256) -> Result<Bytes, AccountError>;

    /// Current replay nonce for operations.
    async fn operation_nonce(&self) -> Result<U256, AccountError>;

    /// Factory call to attach when the account is not deployed yet.
    async fn deployment(&self) -> Result<Option<AccountDeployment>, AccountError>;

    /// Wraps calls into the account's execute calldata.
    fn encode_calls(&self, calls: &[Call]) -> Result<Bytes, AccountError>;

    /// Hash that identifies `op` at the relay and that the account signs.
    fn operation_hash(&self, op: &SponsoredOperation) -> B256;

    /// Signs `op`, returning the value for its signature field.
    async fn sign_operation(&self, op: &SponsoredOperation) -> Result<Bytes, AccountError>;
}

/// Maps payer addresses to their signing accounts.
#[derive(Default)]
pub struct AccountRegistry {
    accounts: DashMap<Address, Arc<dyn SmartAccount>>,
}

impl std::fmt::Debug for AccountRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let addresses: Vec<Address> = self.accounts.iter().map(|e| *e.key()).collect();
        f.debug_struct("AccountRegistry")
            .field("accounts", &addresses)
            .finish()
    }
}

impl AccountRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `account` under its own address, replacing any previous entry.
    pub fn register(&self, account: Arc<dyn SmartAccount>) {
        self.accounts.insert(account.address(), account);
    }

    /// Looks up the account for `payer`.
    #[must_use]
    pub fn get(&self, payer: &Address) -> Option<Arc<dyn SmartAccount>> {
        self.accounts.get(payer).map(|entry| Arc::clone(entry.value()))
    }

    /// Number of registered accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// Whether no account is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}
