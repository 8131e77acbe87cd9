//! Error types for the EVM binding.

use alloy_transport::TransportError;
use reqwest::StatusCode;
use subpay::gas::FeeQuoteError;
use subpay::relay::RelayError;

/// Failures of direct chain reads (`eth_call`, `eth_getCode`, `eth_getLogs`).
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// RPC transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Contract call failed or returned undecodable data.
    #[error("Contract call failed: {0}")]
    ContractCall(String),
}

impl From<alloy_contract::Error> for ChainError {
    fn from(e: alloy_contract::Error) -> Self {
        match e {
            alloy_contract::Error::TransportError(e) => Self::Transport(e),
            other => Self::ContractCall(other.to_string()),
        }
    }
}

/// Errors that can occur while talking to a bundler.
#[derive(Debug, thiserror::Error)]
pub enum BundlerError {
    /// URL parse error.
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        /// Human-readable context.
        context: &'static str,
        /// The underlying parse error.
        #[source]
        source: url::ParseError,
    },
    /// HTTP transport error.
    #[error("HTTP error: {context}: {source}")]
    Http {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// JSON deserialization error.
    #[error("Failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        /// Human-readable context.
        context: &'static str,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Unexpected HTTP status code.
    #[error("Unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        /// Human-readable context.
        context: &'static str,
        /// The HTTP status code.
        status: StatusCode,
        /// The response body.
        body: String,
    },
    /// Failed to read response body.
    #[error("Failed to read response body as text: {context}: {source}")]
    ResponseBodyRead {
        /// Human-readable context.
        context: &'static str,
        /// The underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },
    /// The bundler answered with a JSON-RPC error object.
    #[error("JSON-RPC error {code}: {context}: {message}")]
    Rpc {
        /// Human-readable context.
        context: &'static str,
        /// JSON-RPC error code.
        code: i64,
        /// Error message from the bundler.
        message: String,
    },
}

/// JSON-RPC "internal error". The bundler may have failed after accepting.
const RPC_INTERNAL_ERROR: i64 = -32603;

impl BundlerError {
    /// Whether the bundler definitely processed and refused the request.
    ///
    /// Transport-level failures and internal errors leave it unknown whether
    /// the request was accepted.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::Rpc { code, .. } => *code != RPC_INTERNAL_ERROR,
            Self::HttpStatus { status, .. } => status.is_client_error(),
            _ => false,
        }
    }
}

impl From<BundlerError> for RelayError {
    fn from(e: BundlerError) -> Self {
        if e.is_rejection() {
            Self::Rejected(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<BundlerError> for FeeQuoteError {
    fn from(e: BundlerError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_error_is_rejection() {
        let e = BundlerError::Rpc {
            context: "eth_sendUserOperation",
            code: -32500,
            message: "AA21 didn't pay prefund".into(),
        };
        assert!(matches!(RelayError::from(e), RelayError::Rejected(m) if m.contains("AA21")));
    }

    #[test]
    fn test_rpc_internal_error_is_ambiguous() {
        let e = BundlerError::Rpc {
            context: "eth_sendUserOperation",
            code: -32603,
            message: "internal error".into(),
        };
        assert!(!e.is_rejection());
        assert!(matches!(RelayError::from(e), RelayError::Transport(m) if m.contains("internal")));
    }

    #[test]
    fn test_server_error_is_ambiguous() {
        let e = BundlerError::HttpStatus {
            context: "eth_sendUserOperation",
            status: StatusCode::BAD_GATEWAY,
            body: String::new(),
        };
        assert!(matches!(RelayError::from(e), RelayError::Transport(_)));
    }
}
