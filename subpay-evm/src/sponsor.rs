//! Token paymaster overhead.
//!
//! The paymaster charges gas for its own post-operation accounting and
//! publishes the amount through `additionalGasCharge()`. The post-op gas
//! limit of every operation must cover it or the paymaster rejects the bundle.

use alloy_primitives::Address;
use alloy_provider::Provider;
use async_trait::async_trait;
use subpay::gas::{FeeQuoteError, SponsorOverhead};
use tracing::Instrument;

use crate::contract::ISponsor;

/// Reads the declared overhead from the paymaster contract.
#[derive(Debug, Clone)]
pub struct PaymasterOverhead<P> {
    provider: P,
}

impl<P: Provider> PaymasterOverhead<P> {
    /// Reads through `provider`.
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: Provider> SponsorOverhead for PaymasterOverhead<P> {
    async fn declared_overhead(&self, sponsor: Address) -> Result<u128, FeeQuoteError> {
        let paymaster = ISponsor::new(sponsor, &self.provider);
        let charge = paymaster
            .additionalGasCharge()
            .call()
            .into_future()
            .instrument(tracing::info_span!("fetch_sponsor_overhead", %sponsor, otel.kind = "client"))
            .await
            .map_err(|e| FeeQuoteError::SponsorOverhead(e.to_string()))?;
        u128::try_from(charge)
            .map_err(|_| FeeQuoteError::SponsorOverhead(format!("overhead {charge} out of range")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::ISponsor::additionalGasChargeCall;
    use crate::testing::RpcNode;
    use alloy_primitives::U256;
    use alloy_sol_types::{SolCall, SolValue};

    #[tokio::test]
    async fn test_reads_additional_gas_charge() {
        let node = RpcNode::start().await;
        node.on_call(
            additionalGasChargeCall::SELECTOR,
            U256::from(15_000u64).abi_encode(),
        )
        .await;

        let overhead = PaymasterOverhead::new(node.provider())
            .declared_overhead(Address::repeat_byte(0x31))
            .await
            .unwrap();
        assert_eq!(overhead, 15_000);
    }

    #[tokio::test]
    async fn test_unreadable_paymaster() {
        let node = RpcNode::start().await;
        node.fail("eth_call").await;

        let err = PaymasterOverhead::new(node.provider())
            .declared_overhead(Address::repeat_byte(0x31))
            .await
            .unwrap_err();
        assert!(matches!(err, FeeQuoteError::SponsorOverhead(_)));
    }
}
