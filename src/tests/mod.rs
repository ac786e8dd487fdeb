//! Shared fixtures for the scenario tests.

use blockwatch_sync::mock::{ChainBuilder, MockFeed, MockIndexer, RecordingProvider};
use blockwatch_sync::{
    Block, BlockId, BlockSync, BlockWatcher, BlockWatcherConfig, ProviderRegistry, SyncConfig,
};
use std::sync::Arc;
use std::time::Duration;

pub mod sync_test;

pub struct TestHarness {
    pub indexer: Arc<MockIndexer>,
    pub feed: Arc<MockFeed>,
}

impl TestHarness {
    /// A chain with blocks at heights `0..=tip`.
    pub fn new(tip: usize) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            indexer: Arc::new(MockIndexer::new(ChainBuilder::new().add_blocks(tip))),
            feed: Arc::new(MockFeed::new()),
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            feed_url: "mock://feed".to_string(),
            max_queue: 16,
            dial_timeout: Duration::from_secs(1),
            retry_timeout: Duration::from_millis(10),
            read_timeout: Duration::from_secs(5),
            topic: "blocks".to_string(),
            reconnect_delay: Duration::from_millis(20),
            exit_at: None,
        }
    }

    pub fn watcher(&self, start: BlockId, max_queue: usize) -> BlockWatcher<MockIndexer, MockFeed> {
        let config = BlockWatcherConfig {
            max_queue,
            ..self.sync_config().watcher_config(start)
        };
        BlockWatcher::new(self.indexer.clone(), self.feed.clone(), config)
    }

    /// Cursor of the block at `height` on the mock chain.
    pub fn id_at(&self, height: i64) -> BlockId {
        self.indexer.block(height).expect("block on mock chain").id()
    }

    pub fn provider_at(&self, name: &str, height: i64) -> Arc<RecordingProvider> {
        Arc::new(RecordingProvider::new(name, self.id_at(height)))
    }

    pub fn engine(
        &self,
        providers: &[Arc<RecordingProvider>],
        config: SyncConfig,
    ) -> Arc<BlockSync<MockIndexer, MockFeed>> {
        let mut registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider.clone()).unwrap();
        }
        Arc::new(BlockSync::new(
            self.indexer.clone(),
            self.feed.clone(),
            Arc::new(registry),
            config,
        ))
    }

    /// Mine the next block and publish it on the feed.
    pub fn mine_and_publish(&self) -> Block {
        let block = self.indexer.mine();
        self.feed.publish(&block);
        block
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Every block extends the one before it.
pub fn assert_continuous(blocks: &[Block]) {
    for pair in blocks.windows(2) {
        assert_eq!(pair[1].height, pair[0].height + 1, "height gap after {}", pair[0].id());
        assert_eq!(
            pair[1].parent_hash.as_ref(),
            Some(&pair[0].hash),
            "parent mismatch after {}",
            pair[0].id()
        );
    }
}
