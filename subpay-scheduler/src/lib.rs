//! Recurring sponsored-payment scheduler service.
//!
//! Runs the `subpay` engine against an ERC-4337 bundler: a periodic scheduler,
//! an optional on-chain trigger listener and a small status server.
//!
//! # Modules
//!
//! - [`config`] - Service configuration with environment variable expansion
//! - [`engine`] - Engine wiring from configuration
//! - [`status`] - `/health` and `/status` endpoints
//! - [`error`] - Startup errors
//! - [`util`] - Shutdown signal handling

pub mod config;
pub mod engine;
pub mod error;
pub mod status;
pub mod util;

pub use config::SchedulerConfig;
pub use engine::Engine;
pub use status::status_router;
