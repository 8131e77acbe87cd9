//! ERC-4337 v0.7 user operations.
//!
//! A [`SponsoredOperation`] maps onto two shapes:
//! - the packed form hashed by the entry point (gas pairs folded into
//!   `bytes32` words, factory and paymaster fields concatenated)
//! - the unpacked JSON form bundlers accept on `eth_sendUserOperation`

use alloy_primitives::{Address, B256, Bytes, U256, keccak256};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use subpay::operation::SponsoredOperation;

/// Packs two 128-bit values into one word, `high` first.
#[must_use]
pub fn pack_u128_pair(high: u128, low: u128) -> B256 {
    let mut word = [0u8; 32];
    word[..16].copy_from_slice(&high.to_be_bytes());
    word[16..].copy_from_slice(&low.to_be_bytes());
    B256::from(word)
}

/// `factory ++ factoryData`, or empty for a deployed account.
#[must_use]
pub fn init_code(op: &SponsoredOperation) -> Bytes {
    op.deployment.as_ref().map_or_else(Bytes::new, |d| {
        let mut out = Vec::with_capacity(20 + d.factory_data.len());
        out.extend_from_slice(d.factory.as_slice());
        out.extend_from_slice(&d.factory_data);
        out.into()
    })
}

/// `paymaster ++ verificationGas(16) ++ postOpGas(16) ++ paymasterData`.
#[must_use]
pub fn paymaster_and_data(op: &SponsoredOperation) -> Bytes {
    let mut out = Vec::with_capacity(52 + op.sponsorship_data.len());
    out.extend_from_slice(op.sponsor.as_slice());
    out.extend_from_slice(&op.gas.sponsor_verification_gas_limit.to_be_bytes());
    out.extend_from_slice(&op.gas.sponsor_post_op_gas_limit.to_be_bytes());
    out.extend_from_slice(&op.sponsorship_data);
    out.into()
}

/// The hash the entry point assigns to `op` on `chain_id`.
///
/// This is also the handle bundlers return from `eth_sendUserOperation`, so it
/// can be recorded before submission.
#[must_use]
pub fn user_operation_hash(op: &SponsoredOperation, entry_point: Address, chain_id: u64) -> B256 {
    let account_gas_limits = pack_u128_pair(op.gas.verification_gas_limit, op.gas.call_gas_limit);
    let gas_fees = pack_u128_pair(op.fees.max_priority_fee_per_gas, op.fees.max_fee_per_gas);
    let packed = (
        op.sender,
        op.nonce,
        keccak256(init_code(op)),
        keccak256(&op.call_data),
        account_gas_limits,
        U256::from(op.gas.pre_verification_gas),
        gas_fees,
        keccak256(paymaster_and_data(op)),
    )
        .abi_encode_params();
    let inner = keccak256(packed);
    keccak256((inner, entry_point, U256::from(chain_id)).abi_encode_params())
}

/// Unpacked v0.7 user operation as sent to bundlers.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUserOperation {
    pub sender: Address,
    pub nonce: U256,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub factory: Option<Address>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub factory_data: Option<Bytes>,
    pub call_data: Bytes,
    pub call_gas_limit: U256,
    pub verification_gas_limit: U256,
    pub pre_verification_gas: U256,
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
    pub paymaster: Address,
    pub paymaster_verification_gas_limit: U256,
    pub paymaster_post_op_gas_limit: U256,
    pub paymaster_data: Bytes,
    pub signature: Bytes,
}

impl From<&SponsoredOperation> for RpcUserOperation {
    fn from(op: &SponsoredOperation) -> Self {
        Self {
            sender: op.sender,
            nonce: op.nonce,
            factory: op.deployment.as_ref().map(|d| d.factory),
            factory_data: op.deployment.as_ref().map(|d| d.factory_data.clone()),
            call_data: op.call_data.clone(),
            call_gas_limit: U256::from(op.gas.call_gas_limit),
            verification_gas_limit: U256::from(op.gas.verification_gas_limit),
            pre_verification_gas: U256::from(op.gas.pre_verification_gas),
            max_fee_per_gas: U256::from(op.fees.max_fee_per_gas),
            max_priority_fee_per_gas: U256::from(op.fees.max_priority_fee_per_gas),
            paymaster: op.sponsor,
            paymaster_verification_gas_limit: U256::from(op.gas.sponsor_verification_gas_limit),
            paymaster_post_op_gas_limit: U256::from(op.gas.sponsor_post_op_gas_limit),
            paymaster_data: op.sponsorship_data.clone(),
            signature: op.signature.clone(),
        }
    }
}
