//! Streaming sync.
//!
//! A [`SyncStream`] is a single-consumer, pull-based producer of record
//! changes for one type, resumable from any version. Each yielded record
//! has a version strictly greater than the previously yielded one. With
//! `wait` set, the stream blocks on the store's change notifier until new
//! changes arrive or the caller's cancellation token trips.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::error::{BrokerError, BrokerResult};
use crate::proto;

use super::notify::NotifyHandle;
use super::Store;

/// A lazy, resumable stream of record changes.
///
/// The stream owns its notifier handle and releases it when dropped, so
/// an abandoned consumer never blocks a writer.
pub struct SyncStream {
    store: Arc<Store>,
    record_type: String,
    server_version: u64,
    after: u64,
    wait: bool,
    cancel: CancellationToken,

    handle: Option<NotifyHandle>,
    pending: VecDeque<proto::Record>,
    started: bool,
    done: bool,
}

impl SyncStream {
    pub(crate) fn new(
        store: Arc<Store>,
        record_type: String,
        server_version: u64,
        after: u64,
        wait: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            record_type,
            server_version,
            after,
            wait,
            cancel,
            handle: None,
            pending: VecDeque::new(),
            started: false,
            done: false,
        }
    }

    /// Produce the next record, or block for one when `wait` is set.
    ///
    /// Yields `Err(InvalidServerVersion)` once and ends if the caller's
    /// server version does not match the store's. Yields `Err(Canceled)`
    /// and ends when the cancellation token trips while waiting.
    pub async fn next(&mut self) -> Option<BrokerResult<proto::Record>> {
        if self.done {
            return None;
        }

        if !self.started {
            self.started = true;
            match self.check_server_version() {
                Ok(()) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            // Subscribe before the first scan so a commit between the scan
            // and the wait below cannot be missed.
            self.handle = Some(self.store.notifier().subscribe());
        }

        loop {
            if let Some(rec) = self.pending.pop_front() {
                self.after = rec.version;
                return Some(Ok(rec));
            }

            match self.store.list_changed_after(&self.record_type, self.after) {
                Ok(records) if !records.is_empty() => {
                    self.pending = records.into();
                    continue;
                }
                Ok(_) => {}
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }

            if !self.wait {
                self.done = true;
                self.handle = None;
                return None;
            }

            let handle = self.handle.as_mut().expect("subscribed above");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.done = true;
                    self.handle = None;
                    return Some(Err(BrokerError::Canceled));
                }
                _ = handle.notified() => {}
            }
        }
    }

    fn check_server_version(&self) -> BrokerResult<()> {
        let current = self.store.server_version()?;
        if current != self.server_version {
            return Err(BrokerError::InvalidServerVersion {
                expected: self.server_version,
                observed: current,
            });
        }
        Ok(())
    }
}
