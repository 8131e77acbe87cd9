//! Recurring sponsored-payment scheduler.
//!
//! # Usage
//!
//! ```bash
//! # Run with default config (config.toml in current directory)
//! cargo run -p subpay-scheduler --release
//!
//! # Run with custom config path
//! subpay-scheduler --config /path/to/config.toml
//!
//! # Configure logging level
//! RUST_LOG=subpay=debug,info subpay-scheduler
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG` - Path to TOML configuration file (default: `config.toml`)
//! - `HOST` - Override status server bind address (default: `0.0.0.0`)
//! - `PORT` - Override status server port (default: `4022`)
//! - `RUST_LOG` - Log level filter (default: `info`)
//!
//! A `.env` file in the working directory is loaded first.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::task::TaskTracker;
use tracing_subscriber::EnvFilter;

use subpay_scheduler::config::SchedulerConfig;
use subpay_scheduler::engine::Engine;
use subpay_scheduler::status::status_router;
use subpay_scheduler::util::SigDown;

#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        tracing::error!("Scheduler failed: {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = SchedulerConfig::load_from(&args.config)?;
    tracing::info!(
        host = %config.host,
        port = config.port,
        chain_id = config.chain.chain_id,
        subscriptions = config.subscriptions.len(),
        listener = config.listener.enabled,
        "Loaded configuration"
    );

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();
    let engine = Engine::build(&config).await?;

    let tasks = TaskTracker::new();
    tasks.spawn(Arc::clone(&engine.scheduler).run(cancel.clone()));
    if let Some((listener, source)) = engine.listener {
        tasks.spawn(listener.run(source, cancel.clone()));
    }
    tasks.close();

    let app = status_router(engine.scheduler.subscribe());
    let addr = SocketAddr::new(config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            sig_down.trigger();
            tasks.wait().await;
            return Err(e.into());
        }
    };
    tracing::info!("Status server listening on http://{addr}");

    let shutdown = cancel.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await;
    if served.is_err() {
        sig_down.trigger();
    }

    tasks.wait().await;
    sig_down.recv().await;
    served?;

    tracing::info!("Scheduler shut down gracefully");
    Ok(())
}
