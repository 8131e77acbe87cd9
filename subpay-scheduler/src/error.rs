//! Startup errors for the scheduler service.

use subpay::store::StoreError;
use subpay_evm::error::BundlerError;

/// Errors that stop the engine from being wired.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    /// A secret still holds its `$VAR` placeholder.
    #[error("{0} not resolved (missing env var?)")]
    Unresolved(&'static str),

    /// The owner key does not parse.
    #[error("invalid owner private key: {0}")]
    InvalidKey(String),

    /// The node URL does not parse.
    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    /// `factory` and `factory_data` must be set together.
    #[error("account factory and factory_data must be set together")]
    IncompleteFactory,

    /// The bundler client could not be built.
    #[error("bundler: {0}")]
    Bundler(#[from] BundlerError),

    /// Seeding or recovering the store failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),
}
