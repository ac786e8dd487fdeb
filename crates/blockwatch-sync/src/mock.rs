//! Mock implementations for testing

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    Block, BlockHash, BlockId, FeedSubscription, FeedTransport, IndexerApi, OperationCounts,
    Provider, SyncError, SyncResult,
};

/// Builds a linked chain of blocks with predictable hashes.
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    blocks: Vec<Block>,
    label: String,
    genesis_time: DateTime<Utc>,
}

impl ChainBuilder {
    /// A chain holding only a genesis block at height 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// A chain whose first block sits at `height`.
    pub fn starting_at(height: i64) -> Self {
        let mut chain = Self {
            blocks: Vec::new(),
            label: "B".to_string(),
            genesis_time: DateTime::<Utc>::from_timestamp(1_600_000_000, 0).unwrap_or_default(),
        };
        chain.push(height, None);
        chain
    }

    pub fn add_blocks(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.add_block();
        }
        self
    }

    /// Append the next block and return it.
    pub fn add_block(&mut self) -> Block {
        let tip = self.tip();
        self.push(tip.height + 1, Some(tip.hash))
    }

    /// Replace everything above `height` with `count` blocks on a different branch.
    pub fn fork(&mut self, height: i64, label: &str, count: usize) {
        self.blocks.retain(|b| b.height <= height);
        if let Some(last) = self.blocks.last_mut() {
            last.forward_hash = None;
        }
        self.label = label.to_string();
        for _ in 0..count {
            self.add_block();
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn tip(&self) -> Block {
        self.blocks.last().cloned().unwrap_or_default()
    }

    pub fn get(&self, height: i64) -> Option<&Block> {
        self.blocks.iter().find(|b| b.height == height)
    }

    fn push(&mut self, height: i64, parent_hash: Option<BlockHash>) -> Block {
        let hash = BlockHash::new(format!("{}{}", self.label, height));
        if let Some(last) = self.blocks.last_mut() {
            last.forward_hash = Some(hash.clone());
        }
        let block = Block {
            height,
            hash,
            parent_hash,
            forward_hash: None,
            timestamp: self.genesis_time + ChronoDuration::seconds(8 * height),
            protocol: Some("PtMock".to_string()),
            baker: Some(if height % 2 == 0 { "tz1alice" } else { "tz1bob" }.to_string()),
            operation_counts: OperationCounts {
                transactions: (height % 5) as u64,
                endorsements: 3,
                reveals: (height % 2) as u64,
                ..Default::default()
            },
        };
        self.blocks.push(block.clone());
        block
    }
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// In-memory indexer API over a [`ChainBuilder`].
#[derive(Debug, Clone)]
pub struct MockIndexer {
    chain: Arc<RwLock<ChainBuilder>>,
    failures_left: Arc<AtomicU32>,
    available: Arc<AtomicBool>,
    fetches: Arc<AtomicU64>,
    pages: Arc<AtomicU64>,
}

impl MockIndexer {
    pub fn new(chain: ChainBuilder) -> Self {
        Self {
            chain: Arc::new(RwLock::new(chain)),
            failures_left: Arc::new(AtomicU32::new(0)),
            available: Arc::new(AtomicBool::new(true)),
            fetches: Arc::new(AtomicU64::new(0)),
            pages: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Produce the next block on the chain.
    pub fn mine(&self) -> Block {
        self.chain.write().unwrap().add_block()
    }

    pub fn fork(&self, height: i64, label: &str, count: usize) {
        self.chain.write().unwrap().fork(height, label, count);
    }

    pub fn block(&self, height: i64) -> Option<Block> {
        self.chain.read().unwrap().get(height).cloned()
    }

    pub fn tip(&self) -> Block {
        self.chain.read().unwrap().tip()
    }

    /// Fail the next `count` single-block fetches.
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful single-block fetches.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of paginated history queries served.
    pub fn page_count(&self) -> u64 {
        self.pages.load(Ordering::SeqCst)
    }

    fn check(&self) -> SyncResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Indexer("Indexer not available".to_string()));
        }
        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SyncError::Indexer("Simulated fetch failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl IndexerApi for MockIndexer {
    async fn get_block(&self, hash: &BlockHash) -> SyncResult<Block> {
        self.check()?;
        let chain = self.chain.read().unwrap();
        let block = chain
            .blocks()
            .iter()
            .find(|b| &b.hash == hash)
            .cloned()
            .ok_or_else(|| SyncError::Indexer(format!("Block {} not found", hash)))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }

    async fn get_block_by_height(&self, height: i64) -> SyncResult<Block> {
        self.check()?;
        let block = self
            .block(height)
            .ok_or_else(|| SyncError::Indexer(format!("Block {} not found", height)))?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(block)
    }

    async fn get_blocks(&self, after_height: i64, limit: usize) -> SyncResult<Vec<Block>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Indexer("Indexer not available".to_string()));
        }
        self.pages.fetch_add(1, Ordering::SeqCst);
        let chain = self.chain.read().unwrap();
        Ok(chain
            .blocks()
            .iter()
            .filter(|b| b.height > after_height)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_head(&self) -> SyncResult<Block> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(SyncError::Indexer("Indexer not available".to_string()));
        }
        Ok(self.tip())
    }
}

/// In-memory publish/subscribe transport.
#[derive(Debug, Clone, Default)]
pub struct MockFeed {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>>,
    fail_dial: Arc<AtomicBool>,
    dials: Arc<AtomicUsize>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_dial(&self, fail: bool) {
        self.fail_dial.store(fail, Ordering::SeqCst);
    }

    /// Number of successful subscriptions so far.
    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| !s.is_closed());
        subscribers.len()
    }

    pub fn publish(&self, block: &Block) {
        let raw = serde_json::to_vec(block).unwrap();
        self.publish_raw(raw);
    }

    pub fn publish_raw(&self, raw: Vec<u8>) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|s| s.send(raw.clone()).is_ok());
    }

    /// Drop every subscriber, ending their streams.
    pub fn disconnect_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

#[async_trait]
impl FeedTransport for MockFeed {
    async fn subscribe(&self, endpoint: &str, _topic: &str) -> SyncResult<Box<dyn FeedSubscription>> {
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(SyncError::Transport(format!("Cannot dial {}", endpoint)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(tx);
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSubscription {
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }))
    }
}

pub struct MockSubscription {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    closed: CancellationToken,
}

#[async_trait]
impl FeedSubscription for MockSubscription {
    async fn recv(&self) -> SyncResult<Option<Vec<u8>>> {
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Ok(None),
            msg = async { self.rx.lock().await.recv().await } => Ok(msg),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
        self.rx.lock().await.close();
    }
}

/// Provider that records every block it applies.
#[derive(Debug)]
pub struct RecordingProvider {
    name: String,
    cursor: Mutex<BlockId>,
    enabled: AtomicBool,
    target: Mutex<Option<String>>,
    applied: Mutex<Vec<Block>>,
    ignored: AtomicU64,
    fail_at: Mutex<Option<i64>>,
    history: Mutex<Option<Arc<MockIndexer>>>,
}

impl RecordingProvider {
    pub fn new(name: &str, cursor: BlockId) -> Self {
        Self {
            name: name.to_string(),
            cursor: Mutex::new(cursor),
            enabled: AtomicBool::new(true),
            target: Mutex::new(None),
            applied: Mutex::new(Vec::new()),
            ignored: AtomicU64::new(0),
            fail_at: Mutex::new(None),
            history: Mutex::new(None),
        }
    }

    /// Fill history from `indexer` when asked to catch up.
    pub fn with_history(self, indexer: Arc<MockIndexer>) -> Self {
        *self.history.lock().unwrap() = Some(indexer);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Fail once when asked to apply the block at `height`.
    pub fn fail_at(&self, height: i64) {
        *self.fail_at.lock().unwrap() = Some(height);
    }

    pub fn target(&self) -> Option<String> {
        self.target.lock().unwrap().clone()
    }

    pub fn applied(&self) -> Vec<Block> {
        self.applied.lock().unwrap().clone()
    }

    pub fn applied_heights(&self) -> Vec<i64> {
        self.applied.lock().unwrap().iter().map(|b| b.height).collect()
    }

    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::SeqCst)
    }

    fn apply(&self, block: &Block) -> SyncResult<()> {
        {
            let mut fail_at = self.fail_at.lock().unwrap();
            if *fail_at == Some(block.height) {
                *fail_at = None;
                return Err(SyncError::Provider {
                    name: self.name.clone(),
                    height: block.height,
                    message: "simulated failure".to_string(),
                });
            }
        }

        let mut cursor = self.cursor.lock().unwrap();
        let fresh = if cursor.hash.is_valid() {
            block.height > cursor.height
        } else {
            block.height >= cursor.height
        };
        if !fresh {
            self.ignored.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.applied.lock().unwrap().push(block.clone());
        *cursor = block.id();
        Ok(())
    }
}

#[async_trait]
impl Provider for RecordingProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, target: &str) -> SyncResult<()> {
        *self.target.lock().unwrap() = Some(target.to_string());
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn status(&self) -> BlockId {
        self.cursor.lock().unwrap().clone()
    }

    async fn fill_history(&self) -> SyncResult<()> {
        let indexer = self.history.lock().unwrap().clone();
        let Some(indexer) = indexer else {
            return Ok(());
        };
        let cursor = self.status();
        let after = if cursor.hash.is_valid() {
            cursor.height
        } else {
            cursor.height - 1
        };
        for block in indexer.get_blocks(after, usize::MAX).await? {
            self.apply(&block)?;
        }
        Ok(())
    }

    async fn connect_block(&self, block: &Block) -> SyncResult<()> {
        self.apply(block)
    }

    async fn disconnect_block(&self, _block: &Block) -> SyncResult<()> {
        Ok(())
    }
}
