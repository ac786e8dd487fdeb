//! # Blockwatch-Mono: Block Synchronization Daemon
//!
//! Wires the generic `blockwatch-sync` engine to a real indexer:
//!
//! - **Historical API**: `IndexerClient` against the indexer's REST endpoints.
//! - **Live feed**: `WebSocketFeed` subscribed to the block topic.
//! - **Providers**: one `BlockStatsProvider` per tracked address.
//!
//! Configuration comes from command-line flags with environment fallbacks.
//! Ctrl-C cancels the orchestrator, which exits at its next check point.

use anyhow::{anyhow, Result};
use clap::Parser;
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use blockwatch_sync::{
    BlockStatsProvider, BlockSync, FeedTransport, IndexerApi, IndexerClient, Provider,
    ProviderRegistry, SyncConfig, SyncError, WebSocketFeed,
};

/// Command-line arguments for `blockwatch-mono`.
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, env = "BLOCKWATCH_API_URL")]
    pub api_url: String,
    #[arg(long, env = "BLOCKWATCH_FEED_URL")]
    pub feed_url: String,
    #[arg(long = "target", required = true, help = "Address to track (repeatable)")]
    pub targets: Vec<String>,
    #[arg(long, default_value_t = 0)]
    pub start_block: i64,
    #[arg(long, env = "BLOCKWATCH_MAX_QUEUE", default_value_t = 128)]
    pub max_queue: usize,
    #[arg(long, default_value_t = 10)]
    pub dial_timeout_secs: u64,
    #[arg(long, help = "Delay between historical fetch retries", default_value_t = 5)]
    pub retry_timeout_secs: u64,
    #[arg(long, default_value_t = 60)]
    pub read_timeout_secs: u64,
    #[arg(long, default_value_t = 5)]
    pub reconnect_delay_secs: u64,
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value = "blocks")]
    pub topic: String,
    #[arg(long)]
    pub exit_at: Option<i64>,
    #[arg(long, default_value_t = blockwatch_sync::DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
    #[arg(long, help = "Seconds between provider status reports (0 disables)", default_value_t = 60)]
    pub status_interval_secs: u64,
    #[arg(
        long = "disable-target",
        help = "Tracked address whose provider is registered but receives no blocks (repeatable)"
    )]
    pub disabled_targets: Vec<String>,
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            feed_url: self.feed_url.clone(),
            max_queue: self.max_queue,
            dial_timeout: Duration::from_secs(self.dial_timeout_secs),
            retry_timeout: Duration::from_secs(self.retry_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            topic: self.topic.clone(),
            reconnect_delay: Duration::from_secs(self.reconnect_delay_secs),
            exit_at: self.exit_at,
        }
    }
}

/// Register and initialize one stats provider per target.
pub async fn build_registry<A>(args: &Args, api: Arc<A>) -> Result<ProviderRegistry>
where
    A: IndexerApi + 'static,
{
    if let Some(unknown) = args
        .disabled_targets
        .iter()
        .find(|t| !args.targets.contains(t))
    {
        return Err(anyhow!("--disable-target {} is not a tracked --target", unknown));
    }

    let mut registry = ProviderRegistry::new();
    for target in &args.targets {
        let provider = BlockStatsProvider::new(format!("stats-{}", target), api.clone(), args.start_block)
            .with_page_size(args.page_size);
        provider
            .init(target)
            .await
            .map_err(|e| SyncError::ProviderInit {
                name: provider.name().to_string(),
                message: e.to_string(),
            })?;
        provider.set_enabled(!args.disabled_targets.contains(target));
        info!("Initialized provider {} for {}", provider.name(), target);
        registry.register(Arc::new(provider))?;
    }
    if registry.is_empty() {
        return Err(anyhow!("At least one --target is required"));
    }
    if registry.enabled().next().is_none() {
        return Err(anyhow!("Every --target is disabled, nothing to sync"));
    }
    Ok(registry)
}

/// Log every provider's cursor until `shutdown` fires.
async fn report_status(registry: Arc<ProviderRegistry>, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        for provider in registry.iter() {
            info!(
                "Provider {} (enabled: {}) at {}",
                provider.name(),
                provider.enabled(),
                provider.status()
            );
        }
    }
}

/// Main run function, generic over the indexer API and feed transport.
pub async fn run<A, T>(
    args: Args,
    api: Arc<A>,
    transport: Arc<T>,
    shutdown: CancellationToken,
) -> Result<()>
where
    A: IndexerApi + 'static,
    T: FeedTransport + 'static,
{
    let registry = Arc::new(build_registry(&args, api.clone()).await?);
    info!(
        "Tracking {} targets ({} enabled), resuming from {}",
        args.targets.len(),
        registry.enabled().count(),
        registry
            .min_status()
            .map(|id| id.to_string())
            .unwrap_or_default()
    );

    let reporter_stop = shutdown.child_token();
    let reporter = (args.status_interval_secs > 0).then(|| {
        tokio::spawn(report_status(
            registry.clone(),
            Duration::from_secs(args.status_interval_secs),
            reporter_stop.clone(),
        ))
    });

    let engine = BlockSync::new(api, transport, registry.clone(), args.sync_config());
    let result = engine.run(shutdown.clone()).await;

    reporter_stop.cancel();
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }

    let status = engine.status().await;
    info!(
        "Delivered {} blocks over {} reconnects",
        status.blocks_delivered, status.reconnects
    );

    result.map_err(|e| {
        error!("Fatal sync error: {}", e);
        anyhow!(e)
    })
}

/// Production-specific run function.
pub async fn run_prod(args: Args, shutdown: CancellationToken) -> Result<()> {
    let api = Arc::new(IndexerClient::new(
        &args.api_url,
        Duration::from_secs(args.request_timeout_secs),
    )?);
    let transport = Arc::new(WebSocketFeed::new());
    info!("Indexer API: {}", api.base_url());
    info!("Live feed: {} (topic {})", args.feed_url, args.topic);
    run(args, api, transport, shutdown).await
}
