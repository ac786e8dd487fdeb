//! Common types for blockwatch-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{BlockHash, BlockId, SyncError, SyncResult};

/// Per-kind operation counters carried by a block record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct OperationCounts {
    pub transactions: u64,
    pub originations: u64,
    pub delegations: u64,
    pub reveals: u64,
    pub endorsements: u64,
    pub other: u64,
}

impl OperationCounts {
    pub fn total(&self) -> u64 {
        self.transactions
            + self.originations
            + self.delegations
            + self.reveals
            + self.endorsements
            + self.other
    }

    pub fn add(&mut self, other: &OperationCounts) {
        self.transactions += other.transactions;
        self.originations += other.originations;
        self.delegations += other.delegations;
        self.reveals += other.reveals;
        self.endorsements += other.endorsements;
        self.other += other.other;
    }

    pub fn subtract(&mut self, other: &OperationCounts) {
        self.transactions = self.transactions.saturating_sub(other.transactions);
        self.originations = self.originations.saturating_sub(other.originations);
        self.delegations = self.delegations.saturating_sub(other.delegations);
        self.reveals = self.reveals.saturating_sub(other.reveals);
        self.endorsements = self.endorsements.saturating_sub(other.endorsements);
        self.other = self.other.saturating_sub(other.other);
    }
}

/// A full block record as served by the indexer API and the live feed.
///
/// `forward_hash` is only known once the next block exists; its absence marks
/// the current tip during historical catch-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    #[serde(alias = "level")]
    pub height: i64,
    pub hash: BlockHash,
    #[serde(default, alias = "predecessor", skip_serializing_if = "Option::is_none")]
    pub parent_hash: Option<BlockHash>,
    #[serde(default, alias = "successor", skip_serializing_if = "Option::is_none")]
    pub forward_hash: Option<BlockHash>,
    #[serde(default)]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baker: Option<String>,
    #[serde(default)]
    pub operation_counts: OperationCounts,
}

impl Block {
    pub fn id(&self) -> BlockId {
        BlockId::new(self.height, self.hash.clone(), self.timestamp)
    }

    /// Cursor for this block's parent. The timestamp is not known here.
    pub fn parent_id(&self) -> BlockId {
        BlockId {
            height: self.height - 1,
            hash: self.parent_hash.clone().unwrap_or_default(),
            time: DateTime::<Utc>::default(),
        }
    }

    /// The tip of the chain has no successor yet.
    pub fn is_tip(&self) -> bool {
        !self.forward_hash.as_ref().is_some_and(BlockHash::is_valid)
    }
}

/// Envelope used by feeds that multiplex several message kinds on a topic.
#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Decode a raw feed message.
///
/// Returns `Ok(None)` for envelopes that carry something other than a block.
pub fn decode_block(raw: &[u8]) -> SyncResult<Option<Block>> {
    let value: serde_json::Value =
        serde_json::from_slice(raw).map_err(|e| SyncError::Decode(e.to_string()))?;

    if value.get("type").is_some() {
        let envelope: FeedEnvelope =
            serde_json::from_value(value).map_err(|e| SyncError::Decode(e.to_string()))?;
        if envelope.kind != "block" {
            return Ok(None);
        }
        let data = envelope
            .data
            .ok_or_else(|| SyncError::Decode("block envelope without data".to_string()))?;
        return serde_json::from_value(data)
            .map(Some)
            .map_err(|e| SyncError::Decode(e.to_string()));
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| SyncError::Decode(e.to_string()))
}

/// Lifecycle of a [`crate::BlockWatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Disconnected,
    Connecting,
    Streaming,
    Closing,
}

/// Immutable configuration captured when a watcher is built.
#[derive(Debug, Clone)]
pub struct BlockWatcherConfig {
    /// First block to deliver; historical catch-up starts here.
    pub start_block: BlockId,
    /// Capacity of the output queue.
    pub max_queue: usize,
    pub dial_timeout: Duration,
    /// Delay between historical fetch retries.
    pub retry_timeout: Duration,
    pub read_timeout: Duration,
    /// Feed topic carrying block updates.
    pub topic: String,
}

impl Default for BlockWatcherConfig {
    fn default() -> Self {
        Self {
            start_block: BlockId::default(),
            max_queue: 128,
            dial_timeout: Duration::from_secs(10),
            retry_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(60),
            topic: "blocks".to_string(),
        }
    }
}

/// Configuration for the sync orchestrator
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Address of the live feed
    pub feed_url: String,
    pub max_queue: usize,
    pub dial_timeout: Duration,
    pub retry_timeout: Duration,
    pub read_timeout: Duration,
    pub topic: String,
    /// Pause before reconnecting after a failed iteration
    pub reconnect_delay: Duration,
    /// Stop once every enabled provider reached this height
    pub exit_at: Option<i64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let watcher = BlockWatcherConfig::default();
        Self {
            feed_url: "ws://127.0.0.1:5000/v1/ws".to_string(),
            max_queue: watcher.max_queue,
            dial_timeout: watcher.dial_timeout,
            retry_timeout: watcher.retry_timeout,
            read_timeout: watcher.read_timeout,
            topic: watcher.topic,
            reconnect_delay: Duration::from_secs(5),
            exit_at: None,
        }
    }
}

impl SyncConfig {
    /// Snapshot a watcher configuration resuming from `start_block`.
    pub fn watcher_config(&self, start_block: BlockId) -> BlockWatcherConfig {
        BlockWatcherConfig {
            start_block,
            max_queue: self.max_queue,
            dial_timeout: self.dial_timeout,
            retry_timeout: self.retry_timeout,
            read_timeout: self.read_timeout,
            topic: self.topic.clone(),
        }
    }
}

/// Orchestrator status
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub is_running: bool,
    pub resume_point: Option<BlockId>,
    pub blocks_delivered: u64,
    pub reconnects: u64,
    pub last_block_time: Option<std::time::SystemTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_bare_block() {
        let raw = br#"{
            "level": 42,
            "hash": "BL42",
            "predecessor": "BL41",
            "timestamp": "2024-01-01T00:00:00Z",
            "baker": "tz1baker",
            "operationCounts": {"transactions": 3, "reveals": 1}
        }"#;
        let block = decode_block(raw).unwrap().unwrap();
        assert_eq!(block.height, 42);
        assert_eq!(block.hash, BlockHash::from("BL42"));
        assert_eq!(block.parent_hash, Some(BlockHash::from("BL41")));
        assert!(block.is_tip());
        assert_eq!(block.operation_counts.total(), 4);
    }

    #[test]
    fn test_decode_envelope() {
        let raw = br#"{"type":"block","data":{"height":7,"hash":"B7","parentHash":"B6","forwardHash":"B8"}}"#;
        let block = decode_block(raw).unwrap().unwrap();
        assert_eq!(block.height, 7);
        assert!(!block.is_tip());

        let other = br#"{"type":"head","data":{"height":7}}"#;
        assert!(decode_block(other).unwrap().is_none());
    }

    #[test]
    fn test_decode_garbage_is_error() {
        assert!(matches!(decode_block(b"not json"), Err(SyncError::Decode(_))));
        assert!(matches!(
            decode_block(br#"{"type":"block"}"#),
            Err(SyncError::Decode(_))
        ));
    }

    #[test]
    fn test_counts_subtract_saturates() {
        let mut counts = OperationCounts {
            transactions: 2,
            ..Default::default()
        };
        counts.subtract(&OperationCounts {
            transactions: 5,
            reveals: 1,
            ..Default::default()
        });
        assert_eq!(counts.total(), 0);
    }
}
