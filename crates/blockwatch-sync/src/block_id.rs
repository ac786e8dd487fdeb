//! # Block Identity and Continuity
//!
//! A [`BlockId`] is the cursor every component of the sync pipeline agrees on:
//! providers report their progress as one, the registry picks the lowest one as
//! the resume point, and the watcher validates each live block against the last
//! one it delivered.
//!
//! Height and hash are always replaced together. A cursor may carry an empty
//! hash when only a height is known (bootstrap, or a provider that has not
//! processed anything yet); the continuity predicates fall back to the height
//! check in that case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Block;

/// Opaque block hash as reported by the indexer (base58 for Tezos chains).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// An empty hash stands in for "unknown".
    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            f.write_str(&self.0)
        } else {
            f.write_str("<none>")
        }
    }
}

impl From<&str> for BlockHash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for BlockHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Position marker in the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    pub height: i64,
    pub hash: BlockHash,
    pub time: DateTime<Utc>,
}

impl BlockId {
    pub fn new(height: i64, hash: impl Into<BlockHash>, time: DateTime<Utc>) -> Self {
        Self {
            height,
            hash: hash.into(),
            time,
        }
    }

    /// Cursor that only knows a height. Fetching from it goes by height.
    pub fn at_height(height: i64) -> Self {
        Self {
            height,
            ..Self::default()
        }
    }

    /// True iff `candidate` sits exactly one above this block and names it as parent.
    pub fn is_next_block(&self, candidate: &Block) -> bool {
        if candidate.height != self.height + 1 {
            return false;
        }
        if !self.hash.is_valid() {
            return true;
        }
        candidate.parent_hash.as_ref() == Some(&self.hash)
    }

    /// True iff `candidate` is this very block.
    pub fn is_same_block(&self, candidate: &Block) -> bool {
        candidate.height == self.height && self.hash.is_valid() && candidate.hash == self.hash
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.height, self.hash)
    }
}
