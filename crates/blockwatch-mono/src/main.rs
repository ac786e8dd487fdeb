use anyhow::Result;
use blockwatch_mono::{run_prod, Args};
use clap::Parser;
use log::{error, info};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Cancel `shutdown` on the first Ctrl-C.
fn setup_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, initiating graceful shutdown...");
                shutdown.cancel();
            }
            Err(e) => error!("Error setting up signal handler: {}", e),
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder().format_timestamp_secs().init();

    let args = Args::parse();
    let shutdown = CancellationToken::new();
    setup_signal_handler(shutdown.clone());

    info!("Starting blockwatch-mono");
    info!("Press Ctrl-C to initiate graceful shutdown");

    run_prod(args, shutdown).await
}
