//! levelup - student progression update engine

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use levelup::{config::Args, server, EngineRuntime};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("levelup={},info", args.log_level).into());
    if args.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  levelup - progression update engine");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Store backend: {:?}", args.store_backend);
    info!(
        "Sub-batch size: {} (rate {}/s, burst {}, retries {})",
        args.sub_batch_size, args.txn_rate_per_sec, args.txn_burst, args.sub_batch_retries
    );
    info!("Membership strategy: {}", args.membership_strategy);
    info!("======================================");

    let runtime = Arc::new(
        EngineRuntime::start(&args)
            .await
            .context("Failed to start engine runtime")?,
    );
    let state = Arc::new(server::AppState::new(Arc::clone(&runtime)));

    tokio::select! {
        result = server::run(state, args.listen) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    runtime
        .shutdown()
        .await
        .context("Failed to shut down record store")?;

    info!("levelup stopped");
    Ok(())
}
