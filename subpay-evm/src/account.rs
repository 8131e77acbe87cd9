//! ECDSA-owned Kernel v0.3.1 smart account.
//!
//! [`LocalSmartAccount`] drives a Kernel wallet whose root validator is the
//! ECDSA validator, with the owner key held locally:
//!
//! - calls go through `execute(mode, data)`: a packed single call, or an
//!   ABI-encoded `Execution[]` batch
//! - the replay nonce is `EntryPoint.getNonce(sender, 0)`, which selects the
//!   root validator
//! - operations are signed with EIP-191 over the v0.7 user-operation hash
//! - typed data (permits) is verified by the token through ERC-1271, so the
//!   owner signs Kernel's replay-protected wrapper of the digest and the
//!   result is prefixed with the validator identifier; while the account has
//!   no code the whole signature is wrapped in an EIP-6492 envelope

use alloy_primitives::aliases::U192;
use alloy_primitives::{Address, B256, Bytes, FixedBytes, Signature, U256, eip191_hash_message};
use alloy_provider::Provider;
use alloy_signer_local::PrivateKeySigner;
use alloy_sol_types::{Eip712Domain, SolCall, SolStruct, SolValue, eip712_domain};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use subpay::account::{AccountError, SmartAccount};
use subpay::operation::{AccountDeployment, Call, SponsoredOperation};
use tracing::Instrument;

use crate::contract::{Execution, IEntryPoint, IKernel, Kernel};
use crate::networks::KERNEL_ECDSA_VALIDATOR;
use crate::signature::AccountSignature;
use crate::user_op::user_operation_hash;

/// Kernel release whose EIP-712 domain wraps ERC-1271 hashes.
pub const KERNEL_VERSION: &str = "0.3.1";

/// Validator-type byte of a signature routed to a named validator.
const VALIDATOR_TYPE_VALIDATOR: u8 = 0x01;

/// Execution mode of a single call: call type `0x00`, default exec type.
const EXEC_MODE_SINGLE: B256 = B256::ZERO;

/// Execution mode of a batch: call type `0x01`, default exec type.
const EXEC_MODE_BATCH: B256 = {
    let mut mode = [0u8; 32];
    mode[0] = 0x01;
    B256::new(mode)
};

/// A trait that abstracts signing operations, allowing both owned signers and Arc-wrapped signers.
pub trait SignerLike: Send + Sync {
    /// Returns the address of the signer.
    fn address(&self) -> Address;

    /// Signs the given hash.
    fn sign_hash(
        &self,
        hash: &FixedBytes<32>,
    ) -> impl Future<Output = Result<Signature, alloy_signer::Error>> + Send;
}

impl SignerLike for PrivateKeySigner {
    fn address(&self) -> Address {
        Self::address(self)
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        alloy_signer::Signer::sign_hash(self, hash).await
    }
}

impl<T: SignerLike + Send + Sync> SignerLike for Arc<T> {
    fn address(&self) -> Address {
        (**self).address()
    }

    async fn sign_hash(&self, hash: &FixedBytes<32>) -> Result<Signature, alloy_signer::Error> {
        (**self).sign_hash(hash).await
    }
}

/// A smart account controlled by a local owner key.
#[derive(Debug)]
pub struct LocalSmartAccount<P, S = PrivateKeySigner> {
    provider: P,
    owner: S,
    address: Address,
    entry_point: Address,
    chain_id: u64,
    validator: Address,
    factory: Option<AccountDeployment>,
    deployed: AtomicBool,
}

impl<P: Provider, S: SignerLike> LocalSmartAccount<P, S> {
    /// Creates a handle for the deployed account at `address`.
    pub fn new(provider: P, owner: S, address: Address, entry_point: Address, chain_id: u64) -> Self {
        Self {
            provider,
            owner,
            address,
            entry_point,
            chain_id,
            validator: KERNEL_ECDSA_VALIDATOR,
            factory: None,
            deployed: AtomicBool::new(false),
        }
    }

    /// Overrides the ECDSA validator the account is installed with.
    #[must_use]
    pub fn with_validator(mut self, validator: Address) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the factory call that deploys the account on first use.
    #[must_use]
    pub fn with_factory(mut self, factory: AccountDeployment) -> Self {
        self.factory = Some(factory);
        self
    }

    /// The owner key's address.
    pub fn owner(&self) -> Address {
        self.owner.address()
    }

    /// Kernel's EIP-712 domain for this account.
    pub fn kernel_domain(&self) -> Eip712Domain {
        eip712_domain! {
            name: "Kernel",
            version: KERNEL_VERSION,
            chain_id: self.chain_id,
            verifying_contract: self.address,
        }
    }

    async fn sign_digest(&self, digest: B256) -> Result<Bytes, AccountError> {
        let signature = self
            .owner
            .sign_hash(&digest)
            .await
            .map_err(|e| AccountError::Signing(e.to_string()))?;
        Ok(signature.as_bytes().into())
    }

    async fn is_deployed(&self) -> Result<bool, AccountError> {
        if self.deployed.load(Ordering::Acquire) {
            return Ok(true);
        }
        let code = self
            .provider
            .get_code_at(self.address)
            .into_future()
            .instrument(tracing::info_span!("fetch_account_code", account = %self.address, otel.kind = "client"))
            .await
            .map_err(|e| AccountError::Rpc(e.to_string()))?;
        let deployed = !code.is_empty();
        if deployed {
            self.deployed.store(true, Ordering::Release);
        }
        Ok(deployed)
    }
}

#[async_trait]
impl<P: Provider, S: SignerLike> SmartAccount for LocalSmartAccount<P, S> {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_typed_digest(&self, digest: B256) -> Result<Bytes, AccountError> {
        let wrapped = Kernel { hash: digest }.eip712_signing_hash(&self.kernel_domain());
        let owner_signature = self.sign_digest(wrapped).await?;
        let mut signature = Vec::with_capacity(21 + owner_signature.len());
        signature.push(VALIDATOR_TYPE_VALIDATOR);
        signature.extend_from_slice(self.validator.as_slice());
        signature.extend_from_slice(&owner_signature);
        let inner = Bytes::from(signature);

        match self.deployment().await? {
            Some(d) => Ok(AccountSignature::wrap(d.factory, d.factory_data, inner)),
            None => Ok(inner),
        }
    }

    async fn operation_nonce(&self) -> Result<U256, AccountError> {
        let entry_point = IEntryPoint::new(self.entry_point, &self.provider);
        entry_point
            .getNonce(self.address, U192::ZERO)
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_entry_point_nonce", account = %self.address, otel.kind = "client"))
            .await
            .map_err(|e| AccountError::Rpc(e.to_string()))
    }

    async fn deployment(&self) -> Result<Option<AccountDeployment>, AccountError> {
        let Some(factory) = &self.factory else {
            return Ok(None);
        };
        if self.is_deployed().await? {
            Ok(None)
        } else {
            Ok(Some(factory.clone()))
        }
    }

    fn encode_calls(&self, calls: &[Call]) -> Result<Bytes, AccountError> {
        let (mode, execution) = match calls {
            [] => return Err(AccountError::Encoding("no calls to execute".into())),
            [call] => {
                let mut packed = Vec::with_capacity(52 + call.data.len());
                packed.extend_from_slice(call.target.as_slice());
                packed.extend_from_slice(&call.value.to_be_bytes::<32>());
                packed.extend_from_slice(&call.data);
                (EXEC_MODE_SINGLE, packed)
            }
            many => {
                let executions: Vec<Execution> = many
                    .iter()
                    .map(|c| Execution {
                        target: c.target,
                        value: c.value,
                        callData: c.data.clone(),
                    })
                    .collect();
                (EXEC_MODE_BATCH, executions.abi_encode())
            }
        };
        Ok(IKernel::executeCall {
            execMode: mode,
            executionCalldata: execution.into(),
        }
        .abi_encode()
        .into())
    }

    fn operation_hash(&self, op: &SponsoredOperation) -> B256 {
        user_operation_hash(op, self.entry_point, self.chain_id)
    }

    async fn sign_operation(&self, op: &SponsoredOperation) -> Result<Bytes, AccountError> {
        let hash = self.operation_hash(op);
        self.sign_digest(eip191_hash_message(hash)).await
    }
}
