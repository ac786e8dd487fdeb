//! # Sync Orchestrator
//!
//! [`BlockSync`] is the outer driver loop that keeps every registered provider
//! in step with the chain. Each iteration:
//!
//! 1. lets every enabled provider catch up on its own through paginated
//!    history queries (`fill_history`);
//! 2. computes the registry's minimum cursor, the single point from which no
//!    provider can miss a block;
//! 3. connects a fresh [`BlockWatcher`] from that point;
//! 4. fans every delivered block out to the enabled providers in registration
//!    order.
//!
//! A provider failing to apply a block, a continuity violation, a read
//! timeout or a dropped feed all end the iteration: the watcher is closed,
//! and after `reconnect_delay` the loop starts over from the new minimum.
//! Providers that are ahead of the minimum see a few blocks again and ignore
//! them.
//!
//! ## Shutdown
//!
//! The cancellation token passed to [`BlockSync::run`] is checked before
//! catch-up, before connecting, and on every block pulled from the watcher.
//! Cancellation is a clean exit, not an error. Only unrecoverable errors (see
//! [`SyncError::is_recoverable`]) are returned to the caller.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::{
    Block, BlockId, BlockWatcher, FeedTransport, IndexerApi, ProviderRegistry, SyncConfig,
    SyncError, SyncResult, SyncStatus,
};

/// Why a streaming iteration stopped without an error.
#[derive(Debug, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    ExitHeight,
    Disconnected,
}

/// Drives providers from history into the live feed.
pub struct BlockSync<A, T>
where
    A: IndexerApi,
    T: FeedTransport,
{
    api: Arc<A>,
    transport: Arc<T>,
    registry: Arc<ProviderRegistry>,
    pub config: SyncConfig,
    is_running: Arc<AtomicBool>,
    blocks_delivered: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    last_block_time: Arc<RwLock<Option<SystemTime>>>,
    resume_point: Arc<RwLock<Option<BlockId>>>,
}

impl<A, T> BlockSync<A, T>
where
    A: IndexerApi + 'static,
    T: FeedTransport + 'static,
{
    pub fn new(
        api: Arc<A>,
        transport: Arc<T>,
        registry: Arc<ProviderRegistry>,
        config: SyncConfig,
    ) -> Self {
        Self {
            api,
            transport,
            registry,
            config,
            is_running: Arc::new(AtomicBool::new(false)),
            blocks_delivered: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            last_block_time: Arc::new(RwLock::new(None)),
            resume_point: Arc::new(RwLock::new(None)),
        }
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.is_running.load(Ordering::SeqCst),
            resume_point: self.resume_point.read().await.clone(),
            blocks_delivered: self.blocks_delivered.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
            last_block_time: *self.last_block_time.read().await,
        }
    }

    /// Run until `shutdown` fires, `exit_at` is reached, or an unrecoverable error occurs.
    pub async fn run(&self, shutdown: CancellationToken) -> SyncResult<()> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::Config(
                "Sync orchestrator is already running".to_string(),
            ));
        }

        info!(
            "Starting block sync with {} providers ({} enabled)",
            self.registry.len(),
            self.registry.enabled().count()
        );
        let result = self.run_loop(&shutdown).await;
        self.is_running.store(false, Ordering::SeqCst);

        match &result {
            Ok(()) => info!("Block sync stopped"),
            Err(e) => error!("Block sync aborted: {}", e),
        }
        result
    }

    async fn run_loop(&self, shutdown: &CancellationToken) -> SyncResult<()> {
        loop {
            if shutdown.is_cancelled() {
                info!("Shutdown requested before catch-up");
                return Ok(());
            }

            if !self.catch_up(shutdown).await {
                info!("Shutdown requested during catch-up");
                return Ok(());
            }

            let start = self.registry.min_status().ok_or_else(|| {
                SyncError::Config("No enabled providers to sync".to_string())
            })?;
            *self.resume_point.write().await = Some(start.clone());

            if self.reached_exit(&start) {
                info!("All providers reached exit height at {}", start);
                return Ok(());
            }

            if shutdown.is_cancelled() {
                info!("Shutdown requested before connecting");
                return Ok(());
            }

            let mut watcher = BlockWatcher::new(
                self.api.clone(),
                self.transport.clone(),
                self.config.watcher_config(start.clone()),
            );

            if let Err(e) = watcher.connect(&self.config.feed_url).await {
                if !e.is_recoverable() {
                    return Err(e);
                }
                warn!("Failed to connect block watcher from {}: {}", start, e);
                if !self.pause(shutdown).await {
                    return Ok(());
                }
                continue;
            }

            let outcome = self.stream(&mut watcher, shutdown).await;
            let closed = watcher.close().await;

            match outcome {
                Ok(StreamEnd::Shutdown) => {
                    info!("Shutdown requested while streaming");
                    return Ok(());
                }
                Ok(StreamEnd::ExitHeight) => {
                    info!("All providers reached exit height");
                    return Ok(());
                }
                Ok(StreamEnd::Disconnected) => match closed {
                    Err(e) if !e.is_recoverable() => return Err(e),
                    Err(e) => warn!("Block stream ended: {}", e),
                    Ok(()) => warn!("Block stream ended"),
                },
                Err(e) if e.is_recoverable() => {
                    error!("Block delivery failed: {}", e);
                }
                Err(e) => return Err(e),
            }

            self.reconnects.fetch_add(1, Ordering::SeqCst);
            if !self.pause(shutdown).await {
                return Ok(());
            }
            info!("Reconnecting block watcher");
        }
    }

    /// Let each enabled provider catch up on its own. False on shutdown.
    async fn catch_up(&self, shutdown: &CancellationToken) -> bool {
        for provider in self.registry.enabled() {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return false,
                result = provider.fill_history() => result,
            };
            match result {
                Ok(()) => debug!(
                    "Provider {} caught up to {}",
                    provider.name(),
                    provider.status()
                ),
                // The watcher resumes from this provider's cursor anyway.
                Err(e) => warn!(
                    "Provider {} failed to fill history at {}: {}",
                    provider.name(),
                    provider.status(),
                    e
                ),
            }
        }
        true
    }

    async fn stream(
        &self,
        watcher: &mut BlockWatcher<A, T>,
        shutdown: &CancellationToken,
    ) -> SyncResult<StreamEnd> {
        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Ok(StreamEnd::Shutdown),
                block = watcher.next() => block,
            };

            let Some(block) = next else {
                return Ok(StreamEnd::Disconnected);
            };

            self.deliver(&block).await?;
            self.blocks_delivered.fetch_add(1, Ordering::SeqCst);
            *self.last_block_time.write().await = Some(SystemTime::now());

            if let Some(min) = self.registry.min_status() {
                if self.reached_exit(&min) {
                    return Ok(StreamEnd::ExitHeight);
                }
            }
        }
    }

    /// Fan a block out to enabled providers in registration order.
    ///
    /// The first failure stops delivery of this block to the providers after it.
    pub async fn deliver(&self, block: &Block) -> SyncResult<()> {
        for provider in self.registry.enabled() {
            if let Err(e) = provider.connect_block(block).await {
                error!(
                    "Provider {} failed to apply block {}: {}",
                    provider.name(),
                    block.id(),
                    e
                );
                if !e.is_recoverable() {
                    return Err(e);
                }
                return Err(SyncError::Provider {
                    name: provider.name().to_string(),
                    height: block.height,
                    message: e.to_string(),
                });
            }
        }
        Ok(())
    }

    fn reached_exit(&self, cursor: &BlockId) -> bool {
        self.config
            .exit_at
            .is_some_and(|exit_at| cursor.height >= exit_at)
    }

    /// Wait `reconnect_delay`. False if shutdown fired meanwhile.
    async fn pause(&self, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.reconnect_delay) => true,
        }
    }
}
