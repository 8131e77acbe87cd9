//! Mock JSON-RPC node for provider-backed tests.

use alloy_primitives::hex;
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use serde_json::{Value, json};
use wiremock::{Match, Mock, MockServer, Request, Respond, ResponseTemplate};

/// Matches a JSON-RPC request by method and, for `eth_call`, by selector.
struct RpcCall {
    method: &'static str,
    selector: Option<[u8; 4]>,
}

impl Match for RpcCall {
    fn matches(&self, request: &Request) -> bool {
        let Ok(body) = serde_json::from_slice::<Value>(&request.body) else {
            return false;
        };
        if body["method"] != self.method {
            return false;
        }
        self.selector.is_none_or(|selector| {
            let tx = &body["params"][0];
            let data = tx["input"].as_str().or_else(|| tx["data"].as_str());
            data.is_some_and(|d| d.starts_with(&format!("0x{}", hex::encode(selector))))
        })
    }
}

/// Answers with `result`, echoing the request id.
struct RpcResult(Value);

impl Respond for RpcResult {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = serde_json::from_slice::<Value>(&request.body)
            .map(|b| b["id"].clone())
            .unwrap_or(Value::Null);
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": self.0,
        }))
    }
}

/// Serves `eth_getLogs` with no logs, refusing spans wider than `.0` blocks.
struct BoundedLogs(u64);

impl Respond for BoundedLogs {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = serde_json::from_slice::<Value>(&request.body).unwrap_or(Value::Null);
        let within = match block_range(&body) {
            Some((from, to)) => to >= from && to - from < self.0,
            None => false,
        };
        let mut reply = json!({ "jsonrpc": "2.0", "id": body["id"].clone() });
        if within {
            reply["result"] = json!([]);
        } else {
            reply["error"] = json!({ "code": -32005, "message": "block range too large" });
        }
        ResponseTemplate::new(200).set_body_json(reply)
    }
}

fn block_range(body: &Value) -> Option<(u64, u64)> {
    let block = |key: &str| {
        body["params"][0][key]
            .as_str()
            .and_then(|h| u64::from_str_radix(h.trim_start_matches("0x"), 16).ok())
    };
    Some((block("fromBlock")?, block("toBlock")?))
}

pub struct RpcNode {
    pub server: MockServer,
}

impl RpcNode {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    pub fn provider(&self) -> DynProvider {
        ProviderBuilder::default()
            .connect_http(self.server.uri().parse().unwrap())
            .erased()
    }

    pub async fn on(&self, method: &'static str, result: Value) {
        Mock::given(RpcCall {
            method,
            selector: None,
        })
        .respond_with(RpcResult(result))
        .mount(&self.server)
        .await;
    }

    /// Answers `eth_call`s to the function with `selector` with `returns`.
    pub async fn on_call(&self, selector: [u8; 4], returns: Vec<u8>) {
        Mock::given(RpcCall {
            method: "eth_call",
            selector: Some(selector),
        })
        .respond_with(RpcResult(json!(format!("0x{}", hex::encode(returns)))))
        .mount(&self.server)
        .await;
    }

    /// Answers `eth_getLogs` like a node capping queries at `limit` blocks.
    pub async fn on_logs_within(&self, limit: u64) {
        Mock::given(RpcCall {
            method: "eth_getLogs",
            selector: None,
        })
        .respond_with(BoundedLogs(limit))
        .mount(&self.server)
        .await;
    }

    /// Inclusive block ranges of every `eth_getLogs` received, in order.
    pub async fn log_ranges(&self) -> Vec<(u64, u64)> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| serde_json::from_slice::<Value>(&r.body).ok())
            .filter(|b| b["method"] == "eth_getLogs")
            .filter_map(|b| block_range(&b))
            .collect()
    }

    pub async fn fail(&self, method: &'static str) {
        Mock::given(RpcCall {
            method,
            selector: None,
        })
        .respond_with(ResponseTemplate::new(500))
        .mount(&self.server)
        .await;
    }

    pub async fn requests(&self, method: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| {
                serde_json::from_slice::<Value>(&r.body).is_ok_and(|b| b["method"] == method)
            })
            .count()
    }
}
