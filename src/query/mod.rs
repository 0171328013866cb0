//! Queriers.
//!
//! A querier answers paginated, filtered point/range queries over
//! records. Three implementations: a static in-memory list, a querier
//! over the store's latest snapshot, and a sync querier that maintains a
//! live local mirror of one record type via the change feed and chains to
//! a fallback querier for everything else.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::core::error::BrokerResult;
use crate::filter::{filter_to_dnf, Dnf, FilterExpression};
use crate::proto;
use crate::store::Store;

/// One page of query results. `total_count` is the exact match count
/// across the full scan.
#[derive(Debug, Clone, Default)]
pub struct QueryResults {
    pub records: Vec<proto::Record>,
    pub total_count: u64,
    pub server_version: u64,
    pub record_version: u64,
}

/// Answers record queries.
pub trait Querier: Send + Sync {
    fn query(&self, req: &proto::QueryRequest) -> BrokerResult<QueryResults>;
}

fn parse_filter(req: &proto::QueryRequest) -> BrokerResult<Dnf> {
    let expr = match &req.filter {
        Some(s) => Some(FilterExpression::from_struct(s)?),
        None => None,
    };
    Ok(filter_to_dnf(expr.as_ref()))
}

/// Paginate records already restricted to the request's type and sorted
/// by `(type, id)`. A record matches iff any DNF conjunct fully matches.
fn paginate<'a>(
    records: impl Iterator<Item = &'a proto::Record>,
    dnf: &Dnf,
    offset: u64,
    limit: u64,
) -> BrokerResult<(Vec<proto::Record>, u64)> {
    let mut matched: u64 = 0;
    let mut page = Vec::new();
    for rec in records {
        if !dnf.matches_record(rec)? {
            continue;
        }
        matched += 1;
        if matched > offset && (limit == 0 || (page.len() as u64) < limit) {
            page.push(rec.clone());
        }
    }
    Ok((page, matched))
}

/// A querier over a fixed list of records.
pub struct StaticQuerier {
    records: Vec<proto::Record>,
}

impl StaticQuerier {
    /// Create a querier over the given records, sorted by `(type, id)`.
    pub fn new(mut records: Vec<proto::Record>) -> Self {
        records.sort_by(|a, b| proto::compare_records_by_type_and_id(a, b));
        Self { records }
    }
}

impl Querier for StaticQuerier {
    fn query(&self, req: &proto::QueryRequest) -> BrokerResult<QueryResults> {
        let dnf = parse_filter(req)?;
        let candidates = self.records.iter().filter(|r| r.r#type == req.r#type);
        let (records, total_count) = paginate(candidates, &dnf, req.offset, req.limit)?;
        Ok(QueryResults {
            records,
            total_count,
            ..Default::default()
        })
    }
}

/// A querier that reads a fresh snapshot from the store on every query.
pub struct StoreQuerier {
    store: Arc<Store>,
}

impl StoreQuerier {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl Querier for StoreQuerier {
    fn query(&self, req: &proto::QueryRequest) -> BrokerResult<QueryResults> {
        // The snapshot applies the filter; pagination runs over the
        // already-filtered records.
        let expr = match &req.filter {
            Some(s) => Some(FilterExpression::from_struct(s)?),
            None => None,
        };
        let (server_version, record_version, records) =
            self.store.sync_latest(&req.r#type, expr.as_ref())?;
        let total_count = records.len() as u64;
        let page = records
            .into_iter()
            .skip(req.offset as usize)
            .take(if req.limit == 0 {
                usize::MAX
            } else {
                req.limit as usize
            })
            .collect();
        Ok(QueryResults {
            records: page,
            total_count,
            server_version,
            record_version,
        })
    }
}

#[derive(Default)]
struct MirrorState {
    ready: bool,
    server_version: u64,
    record_version: u64,
    records: BTreeMap<String, proto::Record>,
}

/// A querier that maintains a local mirror of one record type.
///
/// A background task seeds the mirror with `sync_latest` and then tails
/// the change feed with a blocking sync. On a server-version mismatch the
/// local state is discarded and re-seeded. Queries for other record types
/// are forwarded to the fallback querier, as are queries for the mirrored
/// type until the first seed completes.
pub struct SyncQuerier {
    record_type: String,
    fallback: Arc<dyn Querier>,
    state: Arc<RwLock<MirrorState>>,
    cancel: CancellationToken,
}

impl SyncQuerier {
    /// Create the querier and start its background sync loop.
    pub fn new(
        store: Arc<Store>,
        record_type: impl Into<String>,
        fallback: Arc<dyn Querier>,
    ) -> Arc<Self> {
        let record_type = record_type.into();
        let state = Arc::new(RwLock::new(MirrorState::default()));
        let cancel = CancellationToken::new();

        tokio::spawn(run_sync_loop(
            store,
            record_type.clone(),
            Arc::clone(&state),
            cancel.clone(),
        ));

        Arc::new(Self {
            record_type,
            fallback,
            state,
            cancel,
        })
    }

    /// Stop the background loop. Returns promptly even if the loop is
    /// blocked waiting for changes.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SyncQuerier {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Querier for SyncQuerier {
    fn query(&self, req: &proto::QueryRequest) -> BrokerResult<QueryResults> {
        if req.r#type != self.record_type {
            return self.fallback.query(req);
        }

        let state = self.state.read();
        if !state.ready {
            drop(state);
            return self.fallback.query(req);
        }

        let dnf = parse_filter(req)?;
        let (records, total_count) =
            paginate(state.records.values(), &dnf, req.offset, req.limit)?;
        Ok(QueryResults {
            records,
            total_count,
            server_version: state.server_version,
            record_version: state.record_version,
        })
    }
}

async fn run_sync_loop(
    store: Arc<Store>,
    record_type: String,
    state: Arc<RwLock<MirrorState>>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        // Seed with a full snapshot.
        let (server_version, record_version) =
            match store.sync_latest(&record_type, None) {
                Ok((server_version, record_version, records)) => {
                    let mut state = state.write();
                    state.ready = true;
                    state.server_version = server_version;
                    state.record_version = record_version;
                    state.records =
                        records.into_iter().map(|r| (r.id.clone(), r)).collect();
                    (server_version, record_version)
                }
                Err(err) => {
                    tracing::warn!(%err, record_type, "sync querier seed failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
                    }
                    continue;
                }
            };

        // Tail the change feed until the cursor is invalidated.
        let mut stream = Arc::clone(&store).sync(
            &record_type,
            server_version,
            record_version,
            true,
            cancel.child_token(),
        );
        loop {
            let item = tokio::select! {
                _ = cancel.cancelled() => return,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(rec)) => {
                    let mut state = state.write();
                    state.record_version = rec.version;
                    if rec.is_deleted() {
                        state.records.remove(&rec.id);
                    } else {
                        state.records.insert(rec.id.clone(), rec);
                    }
                }
                Some(Err(crate::core::error::BrokerError::Canceled)) | None => return,
                Some(Err(err)) => {
                    tracing::warn!(%err, record_type, "sync querier stream failed, re-seeding");
                    state.write().ready = false;
                    break;
                }
            }
        }
    }
}
