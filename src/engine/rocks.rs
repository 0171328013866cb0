//! RocksDB storage engine.
//!
//! Backs the `file://` DSN. RocksDB already provides ordered iteration
//! and atomic `WriteBatch` commits, so this is a thin translation layer.

use std::path::Path;

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use crate::core::error::{BrokerError, BrokerResult};

use super::{Batch, Engine, ScanDirection};

/// Persistent ordered engine over RocksDB.
pub struct RocksEngine {
    db: DB,
}

impl std::fmt::Debug for RocksEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksEngine").finish_non_exhaustive()
    }
}

impl RocksEngine {
    /// Open (or create) a database at the given path.
    pub fn open(path: &Path) -> BrokerResult<Self> {
        let mut opts = rocksdb::Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path).map_err(BrokerError::storage)?;
        Ok(Self { db })
    }
}

impl Engine for RocksEngine {
    fn get(&self, key: &[u8]) -> BrokerResult<Option<Vec<u8>>> {
        self.db.get(key).map_err(BrokerError::storage)
    }

    fn scan(
        &self,
        lower: &[u8],
        upper: &[u8],
        dir: ScanDirection,
        visit: &mut dyn FnMut(&[u8], &[u8]) -> bool,
    ) -> BrokerResult<()> {
        match dir {
            ScanDirection::Forward => {
                let iter = self
                    .db
                    .iterator(IteratorMode::From(lower, Direction::Forward));
                for item in iter {
                    let (key, value) = item.map_err(BrokerError::storage)?;
                    if key.as_ref() >= upper {
                        break;
                    }
                    if !visit(&key, &value) {
                        break;
                    }
                }
            }
            ScanDirection::Reverse => {
                // Seek to the upper bound and walk backwards; the first
                // positions may still be at or past the bound.
                let iter = self
                    .db
                    .iterator(IteratorMode::From(upper, Direction::Reverse));
                for item in iter {
                    let (key, value) = item.map_err(BrokerError::storage)?;
                    if key.as_ref() >= upper {
                        continue;
                    }
                    if key.as_ref() < lower {
                        break;
                    }
                    if !visit(&key, &value) {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn commit(&self, batch: Batch) -> BrokerResult<()> {
        let mut wb = WriteBatch::default();
        for (key, op) in batch.into_ops() {
            match op {
                Some(value) => wb.put(key, value),
                None => wb.delete(key),
            }
        }
        self.db.write(wb).map_err(BrokerError::storage)
    }
}
