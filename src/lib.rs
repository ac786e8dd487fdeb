//! Blockwatch Test Suite
//!
//! End-to-end scenarios for the block sync engine, run against the in-memory
//! indexer and feed from `blockwatch_sync::mock`.

#[cfg(test)]
mod tests;
