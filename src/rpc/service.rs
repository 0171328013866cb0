//! Record broker service handlers.
//!
//! Typed request handlers over the store. Unary handlers are synchronous
//! (store operations never block); the streaming handlers spawn a
//! producer task and hand back its channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

use crate::filter::FilterExpression;
use crate::proto;
use crate::query::{Querier, StoreQuerier};
use crate::store::Store;

/// Channel depth for streaming responses; applies backpressure to the
/// producer when the client reads slowly.
const STREAM_BUFFER: usize = 16;

/// The broker service backed by a local store.
#[derive(Clone)]
pub struct BrokerService {
    store: Arc<Store>,
}

impl BrokerService {
    /// Create a service over the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Handle Get.
    pub fn get(&self, req: proto::GetRequest) -> Result<proto::GetResponse, Status> {
        let record = self.store.get(&req.r#type, &req.id)?;
        Ok(proto::GetResponse {
            record: Some(record),
        })
    }

    /// Handle Query.
    pub fn query(&self, req: proto::QueryRequest) -> Result<proto::QueryResponse, Status> {
        let results = StoreQuerier::new(Arc::clone(&self.store)).query(&req)?;
        Ok(proto::QueryResponse {
            records: results.records,
            total_count: results.total_count,
            server_version: results.server_version,
            record_version: results.record_version,
        })
    }

    /// Handle Put.
    pub fn put(&self, req: proto::PutRequest) -> Result<proto::PutResponse, Status> {
        let (server_version, records) = self.store.put(None, &req.records)?;
        Ok(proto::PutResponse {
            server_version,
            records,
        })
    }

    /// Handle Patch.
    pub fn patch(&self, req: proto::PatchRequest) -> Result<proto::PatchResponse, Status> {
        let mask = req
            .field_mask
            .as_ref()
            .ok_or_else(|| Status::invalid_argument("field_mask is required"))?;
        let (server_version, records) = self.store.patch(None, &req.records, mask)?;
        Ok(proto::PatchResponse {
            server_version,
            records,
        })
    }

    /// Handle SetOptions.
    pub fn set_options(
        &self,
        req: proto::SetOptionsRequest,
    ) -> Result<proto::SetOptionsResponse, Status> {
        let options = req.options.unwrap_or_default();
        self.store.set_options(&req.r#type, &options)?;
        Ok(proto::SetOptionsResponse {
            options: Some(options),
        })
    }

    /// Handle ListTypes.
    pub fn list_types(&self) -> Result<proto::ListTypesResponse, Status> {
        Ok(proto::ListTypesResponse {
            types: self.store.list_types()?,
        })
    }

    /// Handle ServerInfo.
    pub fn server_info(&self) -> Result<proto::ServerInfoResponse, Status> {
        Ok(proto::ServerInfoResponse {
            server_version: self.store.server_version()?,
            latest_record_version: self.store.latest_record_version()?,
        })
    }

    /// Handle AcquireLease: generate a holder id and try to take the
    /// lease under it. A lease held elsewhere aborts the call.
    pub fn acquire_lease(
        &self,
        req: proto::AcquireLeaseRequest,
    ) -> Result<proto::AcquireLeaseResponse, Status> {
        let ttl = decode_duration(req.duration.as_ref())?;
        let id = format!("{:032x}", rand::random::<u128>());
        if self.store.lease(&req.name, &id, ttl)? {
            Ok(proto::AcquireLeaseResponse { id })
        } else {
            Err(Status::aborted("lease is already taken"))
        }
    }

    /// Handle RenewLease: re-acquire under the caller's holder id.
    pub fn renew_lease(
        &self,
        req: proto::RenewLeaseRequest,
    ) -> Result<proto::RenewLeaseResponse, Status> {
        let ttl = decode_duration(req.duration.as_ref())?;
        if self.store.lease(&req.name, &req.id, ttl)? {
            Ok(proto::RenewLeaseResponse {})
        } else {
            Err(Status::aborted("lease is no longer held"))
        }
    }

    /// Handle ReleaseLease: acquiring with a zero TTL expires the lease
    /// immediately, so the next contender wins.
    pub fn release_lease(
        &self,
        req: proto::ReleaseLeaseRequest,
    ) -> Result<proto::ReleaseLeaseResponse, Status> {
        self.store.lease(&req.name, &req.id, Duration::ZERO)?;
        Ok(proto::ReleaseLeaseResponse {})
    }

    /// Handle Sync: stream record changes until the client goes away or
    /// the stream ends.
    pub fn sync(&self, req: proto::SyncRequest) -> mpsc::Receiver<Result<proto::SyncResponse, Status>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            let mut stream = Arc::clone(&store).sync(
                &req.r#type,
                req.server_version,
                req.record_version,
                req.wait,
                cancel.clone(),
            );
            loop {
                let item = tokio::select! {
                    _ = tx.closed() => {
                        cancel.cancel();
                        return;
                    }
                    item = stream.next() => item,
                };
                match item {
                    Some(Ok(record)) => {
                        let resp = proto::SyncResponse {
                            record: Some(record),
                        };
                        if tx.send(Ok(resp)).await.is_err() {
                            cancel.cancel();
                            return;
                        }
                    }
                    Some(Err(err)) => {
                        let _ = tx.send(Err(err.to_status())).await;
                        return;
                    }
                    None => return,
                }
            }
        });
        rx
    }

    /// Handle SyncLatest: stream the snapshot records, then the versions
    /// cursor for tailing.
    pub fn sync_latest(
        &self,
        req: proto::SyncLatestRequest,
    ) -> mpsc::Receiver<Result<proto::SyncLatestResponse, Status>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let filter = match req.filter.as_ref().map(FilterExpression::from_struct) {
                Some(Ok(expr)) => Some(expr),
                Some(Err(err)) => {
                    let _ = tx.send(Err(err.to_status())).await;
                    return;
                }
                None => None,
            };

            let (server_version, latest_record_version, records) =
                match store.sync_latest(&req.r#type, filter.as_ref()) {
                    Ok(snapshot) => snapshot,
                    Err(err) => {
                        let _ = tx.send(Err(err.to_status())).await;
                        return;
                    }
                };

            for record in records {
                let resp = proto::SyncLatestResponse {
                    response: Some(proto::sync_latest_response::Response::Record(record)),
                };
                if tx.send(Ok(resp)).await.is_err() {
                    return;
                }
            }

            let versions = proto::SyncLatestResponse {
                response: Some(proto::sync_latest_response::Response::Versions(
                    proto::Versions {
                        server_version,
                        latest_record_version,
                    },
                )),
            };
            let _ = tx.send(Ok(versions)).await;
        });
        rx
    }
}

fn decode_duration(d: Option<&prost_types::Duration>) -> Result<Duration, Status> {
    let d = d.ok_or_else(|| Status::invalid_argument("duration is required"))?;
    if d.seconds < 0 || d.nanos < 0 {
        return Err(Status::invalid_argument("duration must not be negative"));
    }
    Ok(Duration::new(d.seconds as u64, d.nanos as u32))
}
