//! Block statistics provider.
//!
//! Accumulates chain-wide operation totals and counts the blocks baked by the
//! tracked address. The cursor is the last applied block; a cursor without a
//! hash means nothing has been applied yet and the block at its height is the
//! first one to take.

use async_trait::async_trait;
use log::{debug, info};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{Block, BlockId, IndexerApi, OperationCounts, Provider, SyncError, SyncResult};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BlockStats {
    pub blocks: u64,
    pub baked_by_target: u64,
    pub operations: OperationCounts,
}

#[derive(Debug, Default)]
struct StatsState {
    target: Option<String>,
    cursor: BlockId,
    stats: BlockStats,
}

pub struct BlockStatsProvider<A: IndexerApi> {
    name: String,
    api: Arc<A>,
    start: BlockId,
    page_size: usize,
    enabled: AtomicBool,
    state: RwLock<StatsState>,
}

impl<A: IndexerApi> BlockStatsProvider<A> {
    pub fn new(name: impl Into<String>, api: Arc<A>, start_height: i64) -> Self {
        let start = BlockId::at_height(start_height);
        Self {
            name: name.into(),
            api,
            start: start.clone(),
            page_size: DEFAULT_PAGE_SIZE,
            enabled: AtomicBool::new(true),
            state: RwLock::new(StatsState {
                cursor: start,
                ..Default::default()
            }),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn stats(&self) -> BlockStats {
        self.read().stats.clone()
    }

    pub fn target(&self) -> Option<String> {
        self.read().target.clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, StatsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StatsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one block. Returns false when it was at or below the cursor.
    fn apply(&self, block: &Block) -> SyncResult<bool> {
        let mut state = self.write();
        let cursor = &state.cursor;

        if cursor.hash.is_valid() {
            if block.height <= cursor.height {
                return Ok(false);
            }
            if !cursor.is_next_block(block) {
                return Err(SyncError::Continuity {
                    expected: cursor.clone(),
                    got: block.id(),
                });
            }
        } else {
            if block.height < cursor.height {
                return Ok(false);
            }
            if block.height > cursor.height {
                return Err(SyncError::Continuity {
                    expected: cursor.clone(),
                    got: block.id(),
                });
            }
        }

        let baked = is_baker(block, state.target.as_deref());
        state.stats.blocks += 1;
        state.stats.operations.add(&block.operation_counts);
        if baked {
            state.stats.baked_by_target += 1;
        }
        state.cursor = block.id();
        Ok(true)
    }
}

fn is_baker(block: &Block, target: Option<&str>) -> bool {
    matches!((block.baker.as_deref(), target), (Some(baker), Some(target)) if baker == target)
}

#[async_trait]
impl<A: IndexerApi + 'static> Provider for BlockStatsProvider<A> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, target: &str) -> SyncResult<()> {
        if target.trim().is_empty() {
            return Err(SyncError::Config("empty target address".to_string()));
        }
        let mut state = self.write();
        state.target = Some(target.to_string());
        state.cursor = self.start.clone();
        state.stats = BlockStats::default();
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn status(&self) -> BlockId {
        self.read().cursor.clone()
    }

    async fn fill_history(&self) -> SyncResult<()> {
        if !self.enabled() {
            return Ok(());
        }

        let head = self.api.get_head().await?;
        let mut applied = 0u64;
        loop {
            let cursor = self.status();
            if cursor.hash.is_valid() && cursor.height >= head.height {
                break;
            }
            let after = if cursor.hash.is_valid() {
                cursor.height
            } else {
                cursor.height - 1
            };

            let limit = self.page_size.min((head.height - after).max(1) as usize);
            let page = self.api.get_blocks(after, limit).await?;
            if page.is_empty() {
                break;
            }
            for block in &page {
                if self.apply(block)? {
                    applied += 1;
                }
            }
            debug!(
                "Provider {} applied page of {} blocks after {} (head {})",
                self.name,
                page.len(),
                after,
                head.height
            );
        }

        if applied > 0 {
            info!(
                "Provider {} filled {} blocks of history, now at {}",
                self.name,
                applied,
                self.status()
            );
        }
        Ok(())
    }

    async fn connect_block(&self, block: &Block) -> SyncResult<()> {
        if !self.apply(block)? {
            debug!(
                "Provider {} ignoring block {} at or below its cursor",
                self.name,
                block.id()
            );
        }
        Ok(())
    }

    async fn disconnect_block(&self, block: &Block) -> SyncResult<()> {
        let mut state = self.write();
        if !state.cursor.is_same_block(block) {
            return Err(SyncError::Continuity {
                expected: state.cursor.clone(),
                got: block.id(),
            });
        }

        let baked = is_baker(block, state.target.as_deref());
        state.stats.blocks = state.stats.blocks.saturating_sub(1);
        state.stats.operations.subtract(&block.operation_counts);
        if baked {
            state.stats.baked_by_target = state.stats.baked_by_target.saturating_sub(1);
        }
        state.cursor = block.parent_id();
        info!("Provider {} rolled back block {}", self.name, block.id());
        Ok(())
    }
}
