//! # Core Trait Definitions for the Synchronization Framework
//!
//! The sync engine talks to the outside world through three seams:
//!
//! ### [`IndexerApi`]
//! The historical query interface of the chain indexer. Blocks are fetched by
//! hash, by height, or in ascending pages. Each block carries a forward link to
//! its successor, which is how the watcher walks history up to the tip.
//!
//! ### [`FeedTransport`] / [`FeedSubscription`]
//! A publish/subscribe transport delivering raw block-update messages. The
//! receive primitive has no timeout of its own; deadlines are layered on top
//! by [`crate::deadline`].
//!
//! ### [`Provider`]
//! An independent downstream consumer with its own sync cursor. Providers are
//! registered once in a [`crate::ProviderRegistry`] and fed by
//! [`crate::BlockSync`].
//!
//! All traits use `async_trait` and are `Send + Sync` so implementations can be
//! shared between the orchestrator and the watcher's producer task.

use async_trait::async_trait;

use crate::{Block, BlockHash, BlockId, SyncResult};

/// Historical block queries against the indexer.
///
/// Implementations return [`crate::SyncError::Indexer`] for transport or
/// protocol failures. The watcher retries these indefinitely.
#[async_trait]
pub trait IndexerApi: Send + Sync {
    /// Fetch a block by its hash.
    async fn get_block(&self, hash: &BlockHash) -> SyncResult<Block>;

    /// Fetch the block at `height` on the indexer's main chain.
    async fn get_block_by_height(&self, height: i64) -> SyncResult<Block>;

    /// Up to `limit` blocks with height strictly above `after_height`, ascending.
    async fn get_blocks(&self, after_height: i64, limit: usize) -> SyncResult<Vec<Block>>;

    /// The current chain head.
    async fn get_head(&self) -> SyncResult<Block>;
}

/// Dials a publish/subscribe endpoint.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Connect to `endpoint` and register interest in `topic`.
    async fn subscribe(&self, endpoint: &str, topic: &str) -> SyncResult<Box<dyn FeedSubscription>>;
}

/// A live subscription.
///
/// `close` may be called while a `recv` is in flight on another task; that
/// `recv` must then resolve to `Ok(None)` and release whatever it holds.
#[async_trait]
pub trait FeedSubscription: Send + Sync {
    /// Next raw message. `Ok(None)` means the subscription ended.
    async fn recv(&self) -> SyncResult<Option<Vec<u8>>>;

    async fn close(&self);
}

/// A downstream consumer of the ordered block stream.
///
/// Every method takes `&self`; a provider guards its own cursor. It must be
/// idempotent against blocks at or below its cursor because resuming from the
/// registry's minimum re-delivers blocks to providers that are already ahead.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    /// One-time setup for a tracked entity (e.g. a contract address).
    async fn init(&self, target: &str) -> SyncResult<()>;

    fn enabled(&self) -> bool;

    /// Current sync cursor.
    fn status(&self) -> BlockId;

    /// Catch up through direct paginated queries.
    async fn fill_history(&self) -> SyncResult<()>;

    /// Apply a new block.
    async fn connect_block(&self, block: &Block) -> SyncResult<()>;

    /// Roll back a block. Not driven by the orchestrator, which is forward-only.
    async fn disconnect_block(&self, block: &Block) -> SyncResult<()>;
}
