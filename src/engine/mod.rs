//! Ordered key-value engine abstraction.
//!
//! The record store is layered on a single ordered byte-key, byte-value
//! namespace with point gets, directional range scans, and atomic
//! multi-key batch commits. Two engines implement it: an ephemeral
//! in-memory tree and a persistent RocksDB database, selected by DSN.
//!
//! `Batch` doubles as a read-through overlay: reads and scans performed
//! through a batch observe its pending writes, so a multi-record write
//! can build on its own uncommitted state before the atomic commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::error::{BrokerError, BrokerResult};

pub mod memory;
pub mod rocks;

pub use memory::MemoryEngine;
pub use rocks::RocksEngine;

/// Scan direction over a key range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    Forward,
    Reverse,
}

/// An ordered byte-keyed storage engine.
///
/// Scans visit keys in `[lower, upper)` in the requested direction; the
/// visitor returns `false` to stop early. A committed batch is applied
/// atomically: a failed commit leaves no partial writes visible.
pub trait Engine: Send + Sync {
    /// Point lookup.
    fn get(&self, key: &[u8]) -> BrokerResult<Option<Vec<u8>>>;

    /// Ranged iteration over `[lower, upper)`.
    fn scan(
        &self,
        lower: &[u8],
        upper: &[u8],
        dir: ScanDirection,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> BrokerResult<()>;

    /// Atomically apply a batch of writes.
    fn commit(&self, batch: Batch) -> BrokerResult<()>;
}

/// An atomic write batch with a read-through overlay.
///
/// `Some(value)` marks a pending set, `None` a pending delete.
#[derive(Debug, Default)]
pub struct Batch {
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a key-value set.
    pub fn set(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.pending.insert(key, Some(value));
    }

    /// Queue a key deletion.
    pub fn delete(&mut self, key: Vec<u8>) {
        self.pending.insert(key, None);
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if the batch has no pending operations.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain the pending operations in key order.
    pub fn into_ops(self) -> impl Iterator<Item = (Vec<u8>, Option<Vec<u8>>)> {
        self.pending.into_iter()
    }

    /// Point lookup through the overlay: pending writes shadow the engine.
    pub fn read(&self, engine: &dyn Engine, key: &[u8]) -> BrokerResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(Some(value)) => Ok(Some(value.clone())),
            Some(None) => Ok(None),
            None => engine.get(key),
        }
    }

    /// Ranged iteration through the overlay.
    ///
    /// The merged view materializes the engine's range first; pending sets
    /// replace or insert entries and pending deletes remove them.
    pub fn scan(
        &self,
        engine: &dyn Engine,
        lower: &[u8],
        upper: &[u8],
        dir: ScanDirection,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> BrokerResult<()> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        engine.scan(lower, upper, ScanDirection::Forward, &mut |k, v| {
            merged.insert(k.to_vec(), v.to_vec());
            true
        })?;

        for (key, op) in self.pending.range(lower.to_vec()..upper.to_vec()) {
            match op {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        match dir {
            ScanDirection::Forward => {
                for (k, v) in merged.iter() {
                    if !visit(k, v) {
                        break;
                    }
                }
            }
            ScanDirection::Reverse => {
                for (k, v) in merged.iter().rev() {
                    if !visit(k, v) {
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

/// Open an engine from a DSN.
///
/// - `memory://` — ephemeral in-memory engine.
/// - `file://<path>` — persistent RocksDB engine at `<path>`.
pub fn open(dsn: &str) -> BrokerResult<Arc<dyn Engine>> {
    if dsn.starts_with("memory://") {
        return Ok(Arc::new(MemoryEngine::new()));
    }
    if let Some(path) = dsn.strip_prefix("file://") {
        if path.is_empty() {
            return Err(BrokerError::invalid_argument("file:// dsn requires a path"));
        }
        return Ok(Arc::new(RocksEngine::open(std::path::Path::new(path))?));
    }
    Err(BrokerError::invalid_argument(format!(
        "unsupported storage dsn: {dsn}"
    )))
}
