//! ERC-4337 bundler client.
//!
//! Speaks JSON-RPC over HTTP to a bundler and serves two engine seams:
//!
//! - [`Relay`]: `eth_sendUserOperation`, `eth_getUserOperationReceipt` and
//!   `eth_getUserOperationByHash`
//! - [`FeeOracle`]: `pimlico_getUserOperationGasPrice`, one tier of it
//!
//! JSON-RPC error objects are definite rejections. Anything that leaves it
//! unknown whether the bundler saw the request (connection failures, 5xx,
//! undecodable bodies) is reported as a transport error, which the engine
//! treats as an ambiguous submission.

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use subpay::gas::{FeeOracle, FeeQuoteError};
use subpay::operation::{
    FeeQuote, OperationHandle, OperationReceipt, OperationStatus, SponsoredOperation,
};
use subpay::relay::{Relay, RelayError};
use tracing::Instrument;
use url::Url;

use crate::error::BundlerError;
use crate::user_op::RpcUserOperation;

/// Gas price tier requested from the bundler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeeTier {
    /// Cheapest, slowest inclusion.
    Slow,
    /// The bundler's recommended price.
    #[default]
    Standard,
    /// Priority inclusion.
    Fast,
}

/// A JSON-RPC client for one bundler endpoint and entry point.
#[derive(Debug)]
pub struct BundlerClient {
    url: Url,
    client: Client,
    entry_point: Address,
    fee_tier: FeeTier,
    timeout: Option<Duration>,
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct RpcRequest<'a, P> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcUserOperationReceipt {
    user_op_hash: B256,
    success: bool,
    actual_gas_used: U256,
    actual_gas_cost: U256,
    #[serde(default)]
    reason: Option<String>,
    receipt: RpcTransactionReceipt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcTransactionReceipt {
    transaction_hash: Option<B256>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcGasPrice {
    max_fee_per_gas: U256,
    max_priority_fee_per_gas: U256,
}

#[derive(Debug, Deserialize)]
struct RpcGasPriceTiers {
    slow: RpcGasPrice,
    standard: RpcGasPrice,
    fast: RpcGasPrice,
}

impl From<RpcUserOperationReceipt> for OperationReceipt {
    fn from(r: RpcUserOperationReceipt) -> Self {
        Self {
            handle: OperationHandle(r.user_op_hash),
            success: r.success,
            actual_gas_used: r.actual_gas_used,
            actual_gas_cost: r.actual_gas_cost,
            transaction_hash: r.receipt.transaction_hash,
            reason: r.reason.filter(|reason| !reason.is_empty()),
        }
    }
}

impl BundlerClient {
    /// Creates a client for the bundler at `url`, submitting to `entry_point`.
    #[must_use]
    pub fn new(url: Url, entry_point: Address) -> Self {
        Self {
            url,
            client: Client::new(),
            entry_point,
            fee_tier: FeeTier::default(),
            timeout: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Parses `url` and creates a client.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError::UrlParse`] if `url` is not a valid URL.
    pub fn try_new(url: &str, entry_point: Address) -> Result<Self, BundlerError> {
        let url = Url::parse(url).map_err(|e| BundlerError::UrlParse {
            context: "Failed to parse bundler url",
            source: e,
        })?;
        Ok(Self::new(url, entry_point))
    }

    /// Selects the gas price tier used by [`FeeOracle::fee_quote`].
    #[must_use]
    pub const fn with_fee_tier(mut self, tier: FeeTier) -> Self {
        self.fee_tier = tier;
        self
    }

    /// Sets a timeout for every request.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The bundler endpoint.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The entry point operations are submitted to.
    #[must_use]
    pub const fn entry_point(&self) -> Address {
        self.entry_point
    }

    /// Sends `eth_sendUserOperation` and returns the bundler's operation hash.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError`] if the request fails or is refused.
    pub async fn send_user_operation(
        &self,
        op: &RpcUserOperation,
    ) -> Result<B256, BundlerError> {
        self.request("eth_sendUserOperation", (op, self.entry_point))
            .await
    }

    /// Sends `eth_getUserOperationReceipt`. `None` until the operation is included.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError`] if the request fails.
    pub async fn user_operation_receipt(
        &self,
        hash: B256,
    ) -> Result<Option<OperationReceipt>, BundlerError> {
        let receipt: Option<RpcUserOperationReceipt> = self
            .request("eth_getUserOperationReceipt", [hash])
            .await?;
        Ok(receipt.map(Into::into))
    }

    /// Sends `eth_getUserOperationByHash` and reports whether the bundler
    /// knows the operation.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError`] if the request fails.
    pub async fn knows_user_operation(&self, hash: B256) -> Result<bool, BundlerError> {
        let found: Option<serde_json::Value> = self
            .request("eth_getUserOperationByHash", [hash])
            .await?;
        Ok(found.is_some_and(|v| !v.is_null()))
    }

    /// Sends `pimlico_getUserOperationGasPrice` and picks the configured tier.
    ///
    /// # Errors
    ///
    /// Returns [`BundlerError`] if the request fails.
    pub async fn user_operation_gas_price(&self) -> Result<(U256, U256), BundlerError> {
        let tiers: RpcGasPriceTiers = self
            .request("pimlico_getUserOperationGasPrice", [(); 0])
            .await?;
        let price = match self.fee_tier {
            FeeTier::Slow => tiers.slow,
            FeeTier::Standard => tiers.standard,
            FeeTier::Fast => tiers.fast,
        };
        Ok((price.max_fee_per_gas, price.max_priority_fee_per_gas))
    }

    /// JSON-RPC call helper that handles envelope construction, error mapping
    /// and timeout application.
    async fn request<P, R>(&self, method: &'static str, params: P) -> Result<R, BundlerError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let span = tracing::info_span!("subpay.bundler.request", method, otel.kind = "client");
        let result = self.post(method, params).instrument(span).await;
        if let Err(e) = &result {
            tracing::debug!(method, error = %e, "bundler request failed");
        }
        result
    }

    async fn post<P, R>(&self, context: &'static str, params: P) -> Result<R, BundlerError>
    where
        P: Serialize + Send,
        R: DeserializeOwned,
    {
        let payload = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: context,
            params,
        };
        let mut req = self.client.post(self.url.clone()).json(&payload);
        if let Some(timeout) = self.timeout {
            req = req.timeout(timeout);
        }
        let http_response = req
            .send()
            .await
            .map_err(|e| BundlerError::Http { context, source: e })?;

        let status = http_response.status();
        let body = http_response
            .text()
            .await
            .map_err(|e| BundlerError::ResponseBodyRead { context, source: e })?;
        if status != StatusCode::OK {
            return Err(BundlerError::HttpStatus {
                context,
                status,
                body,
            });
        }

        let response: RpcResponse = serde_json::from_str(&body)
            .map_err(|e| BundlerError::JsonDeserialization { context, source: e })?;
        if let Some(error) = response.error {
            return Err(BundlerError::Rpc {
                context,
                code: error.code,
                message: error.message,
            });
        }
        serde_json::from_value(response.result)
            .map_err(|e| BundlerError::JsonDeserialization { context, source: e })
    }
}

#[async_trait]
impl Relay for BundlerClient {
    async fn submit(&self, op: &SponsoredOperation) -> Result<OperationHandle, RelayError> {
        let hash = self
            .send_user_operation(&RpcUserOperation::from(op))
            .await?;
        tracing::info!(operation = %hash, sender = %op.sender, "user operation submitted");
        Ok(OperationHandle(hash))
    }

    async fn status(&self, handle: OperationHandle) -> Result<OperationStatus, RelayError> {
        if let Some(receipt) = self.user_operation_receipt(handle.0).await? {
            return Ok(OperationStatus::Included(receipt));
        }
        if self.knows_user_operation(handle.0).await? {
            Ok(OperationStatus::Pending)
        } else {
            Ok(OperationStatus::Unknown)
        }
    }
}

#[async_trait]
impl FeeOracle for BundlerClient {
    async fn fee_quote(&self) -> Result<FeeQuote, FeeQuoteError> {
        let (max_fee, max_priority) = self.user_operation_gas_price().await?;
        let to_u128 = |v: U256| {
            u128::try_from(v).map_err(|_| FeeQuoteError::Unavailable(format!("fee {v} overflows")))
        };
        Ok(FeeQuote {
            max_fee_per_gas: to_u128(max_fee)?,
            max_priority_fee_per_gas: to_u128(max_priority)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_op::tests::sample_operation;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ENTRY_POINT: Address = Address::repeat_byte(0xe7);

    fn client(server: &MockServer) -> BundlerClient {
        BundlerClient::try_new(&server.uri(), ENTRY_POINT).unwrap()
    }

    async fn mount(server: &MockServer, rpc_method: &str, body: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_submit_returns_bundler_hash() {
        let server = MockServer::start().await;
        let hash = B256::repeat_byte(0xab);
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "eth_sendUserOperation",
                "params": [
                    { "nonce": "0x7", "paymasterData": "0x00aa" },
                    ENTRY_POINT,
                ],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "jsonrpc": "2.0", "id": 1, "result": hash })),
            )
            .mount(&server)
            .await;

        let handle = client(&server).submit(&sample_operation()).await.unwrap();
        assert_eq!(handle, OperationHandle(hash));
    }

    #[tokio::test]
    async fn test_rpc_error_rejects() {
        let server = MockServer::start().await;
        mount(
            &server,
            "eth_sendUserOperation",
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32602, "message": "AA33 reverted" } }),
        )
        .await;

        let err = client(&server).submit(&sample_operation()).await.unwrap_err();
        assert!(matches!(err, RelayError::Rejected(m) if m.contains("AA33")));
    }

    #[tokio::test]
    async fn test_internal_rpc_error_is_transport() {
        let server = MockServer::start().await;
        mount(
            &server,
            "eth_sendUserOperation",
            json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32603, "message": "internal error" } }),
        )
        .await;

        let err = client(&server).submit(&sample_operation()).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_gateway_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).submit(&sample_operation()).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }

    #[tokio::test]
    async fn test_status_included() {
        let server = MockServer::start().await;
        let hash = B256::repeat_byte(0x01);
        let tx = B256::repeat_byte(0x02);
        mount(
            &server,
            "eth_getUserOperationReceipt",
            json!({ "jsonrpc": "2.0", "id": 1, "result": {
                "userOpHash": hash,
                "sender": "0x1111111111111111111111111111111111111111",
                "success": true,
                "actualGasUsed": "0x2710",
                "actualGasCost": "0x3e8",
                "reason": "",
                "receipt": { "transactionHash": tx },
                "logs": [],
            }}),
        )
        .await;

        let status = client(&server).status(OperationHandle(hash)).await.unwrap();
        let OperationStatus::Included(receipt) = status else {
            panic!("expected inclusion");
        };
        assert!(receipt.success);
        assert_eq!(receipt.actual_gas_used, U256::from(10_000u64));
        assert_eq!(receipt.actual_gas_cost, U256::from(1_000u64));
        assert_eq!(receipt.transaction_hash, Some(tx));
        assert_eq!(receipt.reason, None);
    }

    #[tokio::test]
    async fn test_status_pending_then_unknown() {
        let server = MockServer::start().await;
        mount(
            &server,
            "eth_getUserOperationReceipt",
            json!({ "jsonrpc": "2.0", "id": 1, "result": null }),
        )
        .await;
        mount(
            &server,
            "eth_getUserOperationByHash",
            json!({ "jsonrpc": "2.0", "id": 2, "result": { "entryPoint": ENTRY_POINT, "blockNumber": null } }),
        )
        .await;
        let bundler = client(&server);
        assert_eq!(
            bundler.status(OperationHandle(B256::ZERO)).await.unwrap(),
            OperationStatus::Pending
        );

        server.reset().await;
        mount(
            &server,
            "eth_getUserOperationReceipt",
            json!({ "jsonrpc": "2.0", "id": 3, "result": null }),
        )
        .await;
        mount(
            &server,
            "eth_getUserOperationByHash",
            json!({ "jsonrpc": "2.0", "id": 4, "result": null }),
        )
        .await;
        assert_eq!(
            bundler.status(OperationHandle(B256::ZERO)).await.unwrap(),
            OperationStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_fee_quote_uses_selected_tier() {
        let server = MockServer::start().await;
        mount(
            &server,
            "pimlico_getUserOperationGasPrice",
            json!({ "jsonrpc": "2.0", "id": 1, "result": {
                "slow": { "maxFeePerGas": "0x1", "maxPriorityFeePerGas": "0x1" },
                "standard": { "maxFeePerGas": "0x5f5e100", "maxPriorityFeePerGas": "0xf4240" },
                "fast": { "maxFeePerGas": "0x9", "maxPriorityFeePerGas": "0x9" },
            }}),
        )
        .await;

        let quote = client(&server).fee_quote().await.unwrap();
        assert_eq!(quote.max_fee_per_gas, 100_000_000);
        assert_eq!(quote.max_priority_fee_per_gas, 1_000_000);

        let fast = client(&server)
            .with_fee_tier(FeeTier::Fast)
            .fee_quote()
            .await
            .unwrap();
        assert_eq!(fast.max_fee_per_gas, 9);
    }

    #[tokio::test]
    async fn test_fee_quote_outage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let err = client(&server).fee_quote().await.unwrap_err();
        assert!(matches!(err, FeeQuoteError::Unavailable(_)));
    }
}
