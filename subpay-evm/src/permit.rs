//! EIP-2612 permit builder.
//!
//! Signs `Permit(owner, spender, value, nonce, deadline)` over the token's own
//! EIP-712 domain. The domain `name` and `version` are read from the token
//! once and cached; the permit nonce is read fresh for every authorization, so
//! a consumed permit is never re-signed with a stale nonce.
//!
//! Signatures come from the account's ERC-1271 path, since the token checks
//! permits from contract owners with `isValidSignature`.

use alloy_primitives::{Address, U256};
use alloy_provider::Provider;
use alloy_sol_types::{Eip712Domain, SolStruct, eip712_domain};
use async_trait::async_trait;
use subpay::account::SmartAccount;
use subpay::authorization::{AuthorizationError, Authorizer, PERMIT_DEADLINE, SignedAuthorization};
use tokio::sync::OnceCell;
use tracing::Instrument;

use crate::contract::{IERC20Permit, Permit};
use crate::error::ChainError;
use crate::signature::unwrap_eip6492;

/// Builds permits for one token on one chain.
#[derive(Debug)]
pub struct PermitBuilder<P> {
    provider: P,
    token: Address,
    chain_id: u64,
    domain: OnceCell<Eip712Domain>,
}

impl<P: Provider> PermitBuilder<P> {
    /// Creates a builder for `token` on `chain_id`.
    pub fn new(provider: P, token: Address, chain_id: u64) -> Self {
        Self {
            provider,
            token,
            chain_id,
            domain: OnceCell::new(),
        }
    }

    /// The token's EIP-712 domain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if `name()` or `version()` cannot be read.
    pub async fn domain(&self) -> Result<&Eip712Domain, ChainError> {
        self.domain
            .get_or_try_init(|| async {
                let token = IERC20Permit::new(self.token, &self.provider);
                let name = token
                    .name()
                    .call()
                    .into_future()
                    .instrument(tracing::info_span!("fetch_eip712_name", otel.kind = "client"))
                    .await?;
                let version = token
                    .version()
                    .call()
                    .into_future()
                    .instrument(tracing::info_span!("fetch_eip712_version", otel.kind = "client"))
                    .await?;
                Ok::<_, ChainError>(eip712_domain! {
                    name: name,
                    version: version,
                    chain_id: self.chain_id,
                    verifying_contract: self.token,
                })
            })
            .await
    }

    /// Current permit nonce of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the token cannot be read.
    pub async fn nonce(&self, owner: Address) -> Result<U256, ChainError> {
        let token = IERC20Permit::new(self.token, &self.provider);
        let nonce = token
            .nonces(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_permit_nonce", %owner, otel.kind = "client"))
            .await?;
        Ok(nonce)
    }

    /// Token balance of `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the token cannot be read.
    pub async fn balance_of(&self, owner: Address) -> Result<U256, ChainError> {
        let token = IERC20Permit::new(self.token, &self.provider);
        let balance = token
            .balanceOf(owner)
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_token_balance", %owner, otel.kind = "client"))
            .await?;
        Ok(balance)
    }
}

#[async_trait]
impl<P: Provider> Authorizer for PermitBuilder<P> {
    async fn balance(&self, owner: Address) -> Result<U256, AuthorizationError> {
        self.balance_of(owner)
            .await
            .map_err(|e| AuthorizationError::BalanceFetch(e.to_string()))
    }

    async fn authorize(
        &self,
        account: &dyn SmartAccount,
        spender: Address,
        value: U256,
    ) -> Result<SignedAuthorization, AuthorizationError> {
        let owner = account.address();
        let nonce = self
            .nonce(owner)
            .await
            .map_err(|e| AuthorizationError::NonceFetch(e.to_string()))?;
        let domain = self
            .domain()
            .await
            .map_err(|e| AuthorizationError::NonceFetch(format!("permit domain: {e}")))?;

        let permit = Permit {
            owner,
            spender,
            value,
            nonce,
            deadline: PERMIT_DEADLINE,
        };
        let digest = permit.eip712_signing_hash(domain);
        let signed = account
            .sign_typed_digest(digest)
            .await
            .map_err(|e| AuthorizationError::Signing(e.to_string()))?;
        let signature =
            unwrap_eip6492(signed).map_err(|e| AuthorizationError::Signing(e.to_string()))?;

        tracing::debug!(%owner, %spender, %value, %nonce, "permit signed");
        Ok(SignedAuthorization {
            owner,
            spender,
            value,
            nonce,
            deadline: PERMIT_DEADLINE,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::LocalSmartAccount;
    use crate::contract::IERC20Permit::{balanceOfCall, nameCall, noncesCall, versionCall};
    use crate::contract::Kernel;
    use crate::networks::KERNEL_ECDSA_VALIDATOR;
    use crate::testing::RpcNode;
    use alloy_primitives::{Bytes, Signature};
    use alloy_signer_local::PrivateKeySigner;
    use alloy_sol_types::{SolCall, SolValue};
    use subpay::operation::AccountDeployment;

    const TOKEN: Address = Address::repeat_byte(0x75);
    const SPENDER: Address = Address::repeat_byte(0x31);

    async fn token_node(nonce: u64) -> RpcNode {
        let node = RpcNode::start().await;
        node.on_call(nameCall::SELECTOR, "USDC".to_string().abi_encode())
            .await;
        node.on_call(versionCall::SELECTOR, "2".to_string().abi_encode())
            .await;
        node.on_call(noncesCall::SELECTOR, U256::from(nonce).abi_encode())
            .await;
        node
    }

    #[tokio::test]
    async fn test_permit_signed_by_owner_over_token_domain() {
        let node = token_node(3).await;
        let owner = PrivateKeySigner::random();
        let owner_address = owner.address();
        let account =
            LocalSmartAccount::new(node.provider(), owner, Address::repeat_byte(0xaa), Address::ZERO, 421_614);
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        let auth = builder
            .authorize(&account, SPENDER, U256::from(1_000_000u64))
            .await
            .unwrap();

        assert_eq!(auth.nonce, U256::from(3u64));
        assert_eq!(auth.deadline, U256::MAX);
        assert_eq!(auth.owner, Address::repeat_byte(0xaa));
        let expected = Permit {
            owner: auth.owner,
            spender: SPENDER,
            value: auth.value,
            nonce: auth.nonce,
            deadline: U256::MAX,
        }
        .eip712_signing_hash(&eip712_domain! {
            name: "USDC",
            version: "2",
            chain_id: 421_614,
            verifying_contract: TOKEN,
        });
        assert_eq!(auth.signature.len(), 86);
        assert_eq!(&auth.signature[1..21], KERNEL_ECDSA_VALIDATOR.as_slice());
        let wrapped = Kernel { hash: expected }.eip712_signing_hash(&account.kernel_domain());
        let sig = Signature::from_raw(&auth.signature[21..]).unwrap();
        assert_eq!(sig.recover_address_from_prehash(&wrapped).unwrap(), owner_address);
    }

    #[tokio::test]
    async fn test_domain_read_once_nonce_every_time() {
        let node = token_node(0).await;
        let account = LocalSmartAccount::new(
            node.provider(),
            PrivateKeySigner::random(),
            Address::repeat_byte(0xaa),
            Address::ZERO,
            421_614,
        );
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        for _ in 0..3 {
            builder.authorize(&account, SPENDER, U256::from(1u64)).await.unwrap();
        }
        assert_eq!(node.requests("eth_call").await, 3 + 2);
    }

    #[tokio::test]
    async fn test_counterfactual_signature_is_unwrapped() {
        let node = token_node(0).await;
        node.on("eth_getCode", serde_json::json!("0x")).await;
        let account = LocalSmartAccount::new(
            node.provider(),
            PrivateKeySigner::random(),
            Address::repeat_byte(0xaa),
            Address::ZERO,
            421_614,
        )
        .with_factory(AccountDeployment {
            factory: Address::repeat_byte(0x0f),
            factory_data: Bytes::from_static(&[1, 2, 3]),
        });
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        let auth = builder.authorize(&account, SPENDER, U256::from(1u64)).await.unwrap();
        assert_eq!(auth.signature.len(), 86);
    }

    #[tokio::test]
    async fn test_balance_read_from_token() {
        let node = RpcNode::start().await;
        node.on_call(balanceOfCall::SELECTOR, U256::from(2_500_000u64).abi_encode())
            .await;
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        let balance = builder.balance(Address::repeat_byte(0xaa)).await.unwrap();
        assert_eq!(balance, U256::from(2_500_000u64));
    }

    #[tokio::test]
    async fn test_balance_outage_is_balance_fetch_error() {
        let node = RpcNode::start().await;
        node.fail("eth_call").await;
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        let err = builder.balance(Address::repeat_byte(0xaa)).await.unwrap_err();
        assert!(matches!(err, AuthorizationError::BalanceFetch(_)));
    }

    #[tokio::test]
    async fn test_nonce_outage_is_nonce_fetch_error() {
        let node = RpcNode::start().await;
        node.fail("eth_call").await;
        let account = LocalSmartAccount::new(
            node.provider(),
            PrivateKeySigner::random(),
            Address::repeat_byte(0xaa),
            Address::ZERO,
            421_614,
        );
        let builder = PermitBuilder::new(node.provider(), TOKEN, 421_614);

        let err = builder.authorize(&account, SPENDER, U256::from(1u64)).await.unwrap_err();
        assert!(matches!(err, AuthorizationError::NonceFetch(_)));
    }
}
