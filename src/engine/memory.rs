//! In-memory storage engine.
//!
//! Backs the `memory://` DSN. A single ordered map under a reader-writer
//! lock; commits apply all pending operations under one write guard, so
//! readers observe either none or all of a batch.

use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::core::error::BrokerResult;

use super::{Batch, Engine, ScanDirection};

/// Ephemeral ordered engine over a `BTreeMap`.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    map: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryEngine {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Engine for MemoryEngine {
    fn get(&self, key: &[u8]) -> BrokerResult<Option<Vec<u8>>> {
        Ok(self.map.read().get(key).cloned())
    }

    fn scan(
        &self,
        lower: &[u8],
        upper: &[u8],
        dir: ScanDirection,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> BrokerResult<()> {
        let map = self.map.read();
        let range = map.range(lower.to_vec()..upper.to_vec());
        match dir {
            ScanDirection::Forward => {
                for (k, v) in range {
                    if !visit(k, v) {
                        break;
                    }
                }
            }
            ScanDirection::Reverse => {
                for (k, v) in range.rev() {
                    if !visit(k, v) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(&self, batch: Batch) -> BrokerResult<()> {
        let mut map = self.map.write();
        for (key, op) in batch.into_ops() {
            match op {
                Some(value) => {
                    map.insert(key, value);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_and_get() {
        let engine = MemoryEngine::new();
        let mut batch = Batch::new();
        batch.set(b"k".to_vec(), b"v".to_vec());
        engine.commit(batch).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));

        let mut batch = Batch::new();
        batch.delete(b"k".to_vec());
        engine.commit(batch).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), None);
    }

    #[test]
    fn scan_bounds_are_half_open() {
        let engine = MemoryEngine::new();
        let mut batch = Batch::new();
        for key in [&b"a"[..], b"b", b"c"] {
            batch.set(key.to_vec(), b"x".to_vec());
        }
        engine.commit(batch).unwrap();

        let mut keys = Vec::new();
        engine
            .scan(b"a", b"c", ScanDirection::Forward, &mut |k, _| {
                keys.push(k.to_vec());
                true
            })
            .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
