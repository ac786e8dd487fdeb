//! # Block Watcher
//!
//! The [`BlockWatcher`] turns two very different sources into one ordered,
//! gap-free sequence of blocks:
//!
//! 1. **Historical catch-up**: starting at the configured [`BlockId`], blocks
//!    are fetched one by one from the indexer API, following each block's
//!    forward link. Fetch errors are retried after `retry_timeout` until the
//!    watcher is cancelled. A block without a forward link is the tip and ends
//!    this phase.
//! 2. **Live feed**: messages from the feed subscription are decoded and must
//!    extend the last delivered block. Blocks already delivered during
//!    catch-up are skipped; anything that breaks continuity (missed message,
//!    reorganization) ends the stream.
//!
//! ## Concurrency Model
//!
//! One producer task per connection feeds a bounded queue of `max_queue`
//! blocks; the consumer pulls with [`BlockWatcher::next`]. A full queue blocks
//! the producer. Every suspension point of the producer (API fetch, retry
//! delay, feed receive, queue push) races the watcher's cancellation token, so
//! [`BlockWatcher::close`] is observed promptly even when the consumer has
//! stopped reading.
//!
//! ## States
//!
//! `Disconnected -> Connecting -> Streaming -> (Closing | Disconnected)`.
//! End of stream (`next` returning `None`) is not end of data: the caller is
//! expected to close the watcher and reconnect from its own resume point.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::deadline::recv_with_deadline;
use crate::{
    decode_block, Block, BlockHash, BlockId, BlockWatcherConfig, FeedSubscription, FeedTransport,
    IndexerApi, SyncError, SyncResult, WatcherState,
};

/// Upper bound on how long `close` waits for the producer to unwind.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Historical fetcher and live feed reader behind a bounded queue.
pub struct BlockWatcher<A, T>
where
    A: IndexerApi,
    T: FeedTransport,
{
    api: Arc<A>,
    transport: Arc<T>,
    config: BlockWatcherConfig,
    state: WatcherState,
    queue: Option<mpsc::Receiver<Block>>,
    subscription: Option<Arc<dyn FeedSubscription>>,
    cancel: CancellationToken,
    producer: Option<JoinHandle<SyncResult<()>>>,
}

impl<A, T> BlockWatcher<A, T>
where
    A: IndexerApi + 'static,
    T: FeedTransport + 'static,
{
    pub fn new(api: Arc<A>, transport: Arc<T>, config: BlockWatcherConfig) -> Self {
        Self {
            api,
            transport,
            config,
            state: WatcherState::Disconnected,
            queue: None,
            subscription: None,
            cancel: CancellationToken::new(),
            producer: None,
        }
    }

    pub fn config(&self) -> &BlockWatcherConfig {
        &self.config
    }

    pub fn state(&self) -> WatcherState {
        self.state
    }

    /// Subscribe to the feed at `endpoint` and start the producer.
    ///
    /// Dial failures are returned as-is; retrying the connection is the
    /// caller's decision.
    pub async fn connect(&mut self, endpoint: &str) -> SyncResult<()> {
        if self.state != WatcherState::Disconnected || self.producer.is_some() {
            return Err(SyncError::Config(
                "Block watcher is already connected".to_string(),
            ));
        }

        self.state = WatcherState::Connecting;
        info!(
            "Connecting block watcher to {} (topic {}) from block {}",
            endpoint, self.config.topic, self.config.start_block
        );

        let dial = tokio::time::timeout(
            self.config.dial_timeout,
            self.transport.subscribe(endpoint, &self.config.topic),
        )
        .await;

        let subscription: Arc<dyn FeedSubscription> = match dial {
            Ok(Ok(subscription)) => Arc::from(subscription),
            Ok(Err(e)) => {
                self.state = WatcherState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = WatcherState::Disconnected;
                return Err(SyncError::Transport(format!(
                    "Dialing {} timed out after {:?}",
                    endpoint, self.config.dial_timeout
                )));
            }
        };

        let (tx, rx) = mpsc::channel(self.config.max_queue.max(1));
        self.cancel = CancellationToken::new();

        let producer = Producer {
            api: self.api.clone(),
            subscription: subscription.clone(),
            config: self.config.clone(),
            tx,
            cancel: self.cancel.clone(),
        };
        self.producer = Some(tokio::spawn(producer.run()));
        self.queue = Some(rx);
        self.subscription = Some(subscription);
        self.state = WatcherState::Streaming;

        debug!("Block watcher streaming");
        Ok(())
    }

    /// Next block in order, or `None` once the stream has ended.
    pub async fn next(&mut self) -> Option<Block> {
        let queue = self.queue.as_mut()?;
        match queue.recv().await {
            Some(block) => Some(block),
            None => {
                debug!("Block watcher queue closed");
                if self.state == WatcherState::Streaming {
                    self.state = WatcherState::Disconnected;
                }
                None
            }
        }
    }

    /// Stop the producer, close the subscription and discard buffered blocks.
    ///
    /// Returns the reason the producer stopped, if it stopped on an error.
    /// Calling this on a closed watcher is a no-op.
    pub async fn close(&mut self) -> SyncResult<()> {
        if self.producer.is_none() && self.queue.is_none() && self.subscription.is_none() {
            self.state = WatcherState::Disconnected;
            return Ok(());
        }

        self.state = WatcherState::Closing;
        self.cancel.cancel();

        if let Some(subscription) = self.subscription.take() {
            subscription.close().await;
        }

        if let Some(mut queue) = self.queue.take() {
            queue.close();
            let mut discarded = 0usize;
            while queue.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!("Discarded {} undelivered blocks", discarded);
            }
        }

        let result = match self.producer.take() {
            Some(handle) => {
                let abort = handle.abort_handle();
                match tokio::time::timeout(CLOSE_TIMEOUT, handle).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(e)) => Err(SyncError::Transport(format!(
                        "Block watcher producer failed: {}",
                        e
                    ))),
                    Err(_) => {
                        warn!("Block watcher producer did not stop within {:?}", CLOSE_TIMEOUT);
                        abort.abort();
                        Ok(())
                    }
                }
            }
            None => Ok(()),
        };

        self.state = WatcherState::Disconnected;
        info!("Block watcher closed");
        result
    }
}

impl<A, T> Drop for BlockWatcher<A, T>
where
    A: IndexerApi,
    T: FeedTransport,
{
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The background half of a connection.
struct Producer<A: IndexerApi> {
    api: Arc<A>,
    subscription: Arc<dyn FeedSubscription>,
    config: BlockWatcherConfig,
    tx: mpsc::Sender<Block>,
    cancel: CancellationToken,
}

impl<A: IndexerApi + 'static> Producer<A> {
    async fn run(self) -> SyncResult<()> {
        let result = match self.fetch_history().await {
            Ok(Some(tip)) => self.follow_feed(tip).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        self.subscription.close().await;

        match &result {
            Ok(()) => debug!("Block watcher producer finished"),
            Err(e) => error!("Block watcher producer stopped: {}", e),
        }
        result
    }

    /// Walk forward links from the start block to the tip.
    ///
    /// Returns the tip that was delivered, or `None` when cancelled.
    async fn fetch_history(&self) -> SyncResult<Option<BlockId>> {
        let start = &self.config.start_block;
        let mut next_hash = start.hash.is_valid().then(|| start.hash.clone());
        let mut next_height = start.height;
        let mut last: Option<BlockId> = None;
        let mut fetched = 0u64;

        loop {
            let Some(block) = self.fetch(next_hash.as_ref(), next_height).await else {
                return Ok(None);
            };

            if let Some(prev) = &last {
                if !prev.is_next_block(&block) {
                    return Err(SyncError::Continuity {
                        expected: prev.clone(),
                        got: block.id(),
                    });
                }
            }

            let id = block.id();
            let tip = block.is_tip();
            let forward = block.forward_hash.clone().unwrap_or_default();
            if !self.push(block).await {
                return Ok(None);
            }
            fetched += 1;
            if fetched % 1000 == 0 {
                info!("Historical catch-up at block {}", id);
            }

            if tip {
                info!(
                    "Historical catch-up reached tip {} after {} blocks",
                    id, fetched
                );
                return Ok(Some(id));
            }
            next_hash = Some(forward);
            next_height = id.height + 1;
            last = Some(id);
        }
    }

    /// Fetch by hash when known, by height otherwise, retrying until cancelled.
    async fn fetch(&self, hash: Option<&BlockHash>, height: i64) -> Option<Block> {
        loop {
            let request = async {
                match hash {
                    Some(hash) => self.api.get_block(hash).await,
                    None => self.api.get_block_by_height(height).await,
                }
            };

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                result = request => result,
            };

            match result {
                Ok(block) => return Some(block),
                Err(e) => {
                    warn!(
                        "Failed to fetch block {} ({}): {}. Retrying in {:?}",
                        height,
                        hash.map(|h| h.as_str()).unwrap_or("by height"),
                        e,
                        self.config.retry_timeout
                    );
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return None,
                        _ = tokio::time::sleep(self.config.retry_timeout) => {}
                    }
                }
            }
        }
    }

    /// Deliver live blocks that extend `last`.
    async fn follow_feed(&self, mut last: BlockId) -> SyncResult<()> {
        info!("Following live feed from {}", last);

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                received = recv_with_deadline(self.subscription.clone(), self.config.read_timeout) => received,
            };

            let Some(raw) = received? else {
                info!("Feed subscription ended");
                return Ok(());
            };

            let Some(block) = decode_block(&raw)? else {
                continue;
            };

            if block.height < last.height || last.is_same_block(&block) {
                debug!("Skipping already delivered block {}", block.id());
                continue;
            }

            if !last.is_next_block(&block) {
                error!(
                    "Live block {} (parent {}) does not extend {}",
                    block.id(),
                    block.parent_hash.clone().unwrap_or_default(),
                    last
                );
                return Err(SyncError::Continuity {
                    expected: last,
                    got: block.id(),
                });
            }

            let id = block.id();
            if !self.push(block).await {
                return Ok(());
            }
            debug!("Delivered live block {}", id);
            last = id;
        }
    }

    /// Enqueue a block, waiting for room. False when cancelled or the consumer is gone.
    async fn push(&self, block: Block) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(block) => sent.is_ok(),
        }
    }
}
