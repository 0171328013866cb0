//! Record store.
//!
//! CRUD on versioned records over an ordered key-value engine, with
//! per-type capacity options, cooperative leases, a change log, and
//! streaming sync (see [`sync`]).
//!
//! Concurrency model: one reader-writer lock over the logical keyspace.
//! Reads (`get`, `get_options`, `list_types`, change-log scans) take the
//! read side; writes (`put`, `patch`, `set_options`, `lease`, eviction)
//! take the write side and commit their batch before releasing it. The
//! change notifier is fired after a successful commit, outside the
//! critical section.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use prost::Message;

use crate::core::error::{BrokerError, BrokerResult};
use crate::core::time::Timestamp;
use crate::engine::{self, Batch, Engine, ScanDirection};
use crate::filter::FilterExpression;
use crate::proto;

pub mod keyspace;
pub mod migrate;
pub mod notify;
pub mod sync;

use self::keyspace::{change, change_index_by_type, decode_u64, encode_u64, lease, metadata,
    modified_at_index, options, record};
use self::notify::ChangeNotifier;
use self::sync::SyncStream;

struct Inner {
    engine: Arc<dyn Engine>,
}

/// The record store.
pub struct Store {
    inner: RwLock<Inner>,
    notifier: ChangeNotifier,
}

impl Store {
    /// Open a store from a DSN (`memory://` or `file://<path>`), applying
    /// any pending schema migrations before returning.
    pub fn open(dsn: &str) -> BrokerResult<Arc<Self>> {
        let engine = engine::open(dsn)?;
        migrate::run(&*engine)?;
        tracing::info!(dsn, "opened record store");
        Ok(Arc::new(Self {
            inner: RwLock::new(Inner { engine }),
            notifier: ChangeNotifier::new(),
        }))
    }

    pub(crate) fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// The store's generation identifier.
    pub fn server_version(&self) -> BrokerResult<u64> {
        let inner = self.inner.read();
        read_u64(&*inner.engine, &metadata::server_version_key())
    }

    /// The highest record version ever assigned.
    pub fn latest_record_version(&self) -> BrokerResult<u64> {
        let inner = self.inner.read();
        read_u64(&*inner.engine, &metadata::latest_record_version_key())
    }

    /// Retrieve a live record.
    pub fn get(&self, record_type: &str, id: &str) -> BrokerResult<proto::Record> {
        validate_type(record_type)?;
        let inner = self.inner.read();
        match inner.engine.get(&record::key(record_type, id))? {
            Some(value) => decode_record(&value),
            None => Err(BrokerError::NotFound),
        }
    }

    /// Get the options for a type. Unset options are the empty default,
    /// never an error.
    pub fn get_options(&self, record_type: &str) -> BrokerResult<proto::Options> {
        validate_type(record_type)?;
        let inner = self.inner.read();
        match inner.engine.get(&options::key(record_type))? {
            Some(value) => proto::Options::decode(value.as_slice())
                .map_err(BrokerError::storage),
            None => Ok(proto::Options::default()),
        }
    }

    /// Set the options for a type. Options equal to the empty default are
    /// deleted, since missing options read back as the default anyway.
    pub fn set_options(&self, record_type: &str, opts: &proto::Options) -> BrokerResult<()> {
        validate_type(record_type)?;
        let inner = self.inner.write();
        let mut batch = Batch::new();
        if opts.is_empty() {
            batch.delete(options::key(record_type));
        } else {
            batch.set(options::key(record_type), opts.encode_to_vec());
        }
        inner.engine.commit(batch)
    }

    /// List all known record types, sorted and unique.
    pub fn list_types(&self) -> BrokerResult<Vec<String>> {
        let inner = self.inner.read();
        let (lower, upper) = record::bounds();
        let mut types: Vec<String> = Vec::new();
        let mut scan_err = None;
        inner
            .engine
            .scan(&lower, &upper, ScanDirection::Forward, &mut |key, _| {
                match record::decode_key(key) {
                    Ok((record_type, _)) => {
                        // Keys are sorted by type, so duplicates are consecutive.
                        if types.last().map(String::as_str) != Some(record_type.as_str()) {
                            types.push(record_type);
                        }
                        true
                    }
                    Err(err) => {
                        scan_err = Some(err);
                        false
                    }
                }
            })?;
        if let Some(err) = scan_err {
            return Err(err);
        }
        Ok(types)
    }

    /// Insert or update records.
    ///
    /// Records are versioned in input order inside one atomic batch; an
    /// input with `deleted_at` set deletes the existing record (if any)
    /// and appends a tombstone to the change feed. Capacity options are
    /// enforced for every touched type before the batch commits. Returns
    /// the server version and the records with store-assigned fields:
    /// deletions yield the appended tombstone, and a deletion that
    /// matched no record yields nothing.
    pub fn put(
        &self,
        expected_server_version: Option<u64>,
        records: &[proto::Record],
    ) -> BrokerResult<(u64, Vec<proto::Record>)> {
        self.write_records(expected_server_version, records, None)
    }

    /// Update specific fields of existing records.
    ///
    /// Identical to [`put`](Self::put), except each input's data payload
    /// is merged into the existing record at the mask's paths. Inputs
    /// without an existing record are silently skipped, and inputs with
    /// `deleted_at` set are ignored (patches do not delete).
    pub fn patch(
        &self,
        expected_server_version: Option<u64>,
        records: &[proto::Record],
        mask: &prost_types::FieldMask,
    ) -> BrokerResult<(u64, Vec<proto::Record>)> {
        self.write_records(expected_server_version, records, Some(mask))
    }

    fn write_records(
        &self,
        expected_server_version: Option<u64>,
        records: &[proto::Record],
        mask: Option<&prost_types::FieldMask>,
    ) -> BrokerResult<(u64, Vec<proto::Record>)> {
        let inner = self.inner.write();
        let engine = &*inner.engine;

        let server_version = read_u64(engine, &metadata::server_version_key())?;
        if let Some(expected) = expected_server_version {
            if expected != server_version {
                return Err(BrokerError::InvalidServerVersion {
                    expected,
                    observed: server_version,
                });
            }
        }

        let mut batch = Batch::new();
        let now = Timestamp::now();
        let mut touched: BTreeSet<String> = BTreeSet::new();
        let mut out = Vec::with_capacity(records.len());

        for input in records {
            validate_record(input)?;
            // Deep copy so later caller mutations cannot reach the store.
            let mut rec = input.clone();
            touched.insert(rec.r#type.clone());

            match mask {
                None => {
                    if rec.is_deleted() {
                        let tombstone = delete_record(
                            engine,
                            &mut batch,
                            &rec.r#type,
                            &rec.id,
                            rec.deleted_at.clone(),
                            now,
                        )?;
                        if let Some(tombstone) = tombstone {
                            out.push(tombstone);
                        }
                    } else {
                        update_record(engine, &mut batch, &mut rec, now)?;
                        out.push(rec);
                    }
                }
                Some(mask) => {
                    if rec.is_deleted() {
                        continue;
                    }
                    let existing = batch.read(engine, &record::key(&rec.r#type, &rec.id))?;
                    let Some(existing) = existing else {
                        // No existing record to patch.
                        continue;
                    };
                    let existing = decode_record(&existing)?;
                    rec.data = merge_masked_data(existing.data.as_ref(), rec.data.as_ref(), mask)?;
                    update_record(engine, &mut batch, &mut rec, now)?;
                    out.push(rec);
                }
            }
        }

        for record_type in &touched {
            enforce_capacity(engine, &mut batch, record_type, now)?;
        }

        engine.commit(batch)?;
        drop(inner);

        self.notifier.broadcast();
        Ok((server_version, out))
    }

    /// Acquire or renew a lease.
    ///
    /// Succeeds when no lease exists for the name, the current lease has
    /// expired, or the requester already holds it; otherwise returns
    /// `false` without mutating. Expiry is evaluated lazily here; there
    /// is no background reaper.
    pub fn lease(&self, name: &str, holder_id: &str, ttl: Duration) -> BrokerResult<bool> {
        if name.is_empty() {
            return Err(BrokerError::invalid_argument("lease name must not be empty"));
        }
        let inner = self.inner.write();
        let engine = &*inner.engine;
        let now = Timestamp::now();

        if let Some(value) = engine.get(&lease::key(name))? {
            let (current_holder, expires_at) = lease::decode_value(&value)?;
            if current_holder != holder_id && !expires_at.is_expired_at(now) {
                return Ok(false);
            }
        }

        let mut batch = Batch::new();
        batch.set(lease::key(name), lease::encode_value(holder_id, now.add(ttl)));
        engine.commit(batch)?;
        Ok(true)
    }

    /// Stream record changes for a type after the given version.
    ///
    /// See [`SyncStream`] for the iteration contract.
    pub fn sync(
        self: Arc<Self>,
        record_type: &str,
        server_version: u64,
        record_version: u64,
        wait: bool,
        cancel: tokio_util::sync::CancellationToken,
    ) -> SyncStream {
        SyncStream::new(
            self,
            record_type.to_string(),
            server_version,
            record_version,
            wait,
            cancel,
        )
    }

    /// Snapshot all live records of a type matching a filter, consistent
    /// at the moment of the call.
    ///
    /// Returns `(server_version, latest_record_version, records)`; callers
    /// tail from there with [`sync`](Self::sync).
    pub fn sync_latest(
        &self,
        record_type: &str,
        filter: Option<&FilterExpression>,
    ) -> BrokerResult<(u64, u64, Vec<proto::Record>)> {
        validate_type(record_type)?;
        let inner = self.inner.read();
        let engine = &*inner.engine;

        let server_version = read_u64(engine, &metadata::server_version_key())?;
        let latest_record_version = read_u64(engine, &metadata::latest_record_version_key())?;

        let (lower, upper) = record::bounds_for_type(record_type);
        let mut raw: Vec<Vec<u8>> = Vec::new();
        engine.scan(&lower, &upper, ScanDirection::Forward, &mut |_, value| {
            raw.push(value.to_vec());
            true
        })?;

        let mut records = Vec::with_capacity(raw.len());
        for value in raw {
            let rec = decode_record(&value)?;
            if rec.is_deleted() {
                continue;
            }
            if let Some(filter) = filter {
                if !filter.matches_record(&rec)? {
                    continue;
                }
            }
            records.push(rec);
        }

        Ok((server_version, latest_record_version, records))
    }

    /// Read the change log for a type, ascending, for versions strictly
    /// greater than `after`.
    pub(crate) fn list_changed_after(
        &self,
        record_type: &str,
        after: u64,
    ) -> BrokerResult<Vec<proto::Record>> {
        let inner = self.inner.read();
        let engine = &*inner.engine;

        let (lower, upper) = change_index_by_type::bounds_for_type_after(record_type, after);
        let mut versions = Vec::new();
        let mut scan_err = None;
        engine.scan(&lower, &upper, ScanDirection::Forward, &mut |key, _| {
            match change_index_by_type::decode_key(key) {
                Ok((_, version)) => {
                    versions.push(version);
                    true
                }
                Err(err) => {
                    scan_err = Some(err);
                    false
                }
            }
        })?;
        if let Some(err) = scan_err {
            return Err(err);
        }

        let mut records = Vec::with_capacity(versions.len());
        for version in versions {
            match engine.get(&change::key(version))? {
                Some(value) => records.push(decode_record(&value)?),
                None => {
                    return Err(BrokerError::storage(format!(
                        "change log entry missing for version {version}"
                    )))
                }
            }
        }
        Ok(records)
    }
}

fn read_u64(engine: &dyn Engine, key: &[u8]) -> BrokerResult<u64> {
    match engine.get(key)? {
        Some(value) => decode_u64(&value),
        None => Ok(0),
    }
}

fn decode_record(value: &[u8]) -> BrokerResult<proto::Record> {
    proto::Record::decode(value).map_err(BrokerError::storage)
}

fn validate_type(record_type: &str) -> BrokerResult<()> {
    if record_type.is_empty() {
        return Err(BrokerError::invalid_argument("record type must not be empty"));
    }
    if record_type.as_bytes().contains(&0x00) {
        return Err(BrokerError::invalid_argument(
            "record type must not contain the 0x00 separator",
        ));
    }
    Ok(())
}

fn validate_record(rec: &proto::Record) -> BrokerResult<()> {
    validate_type(&rec.r#type)?;
    if rec.id.is_empty() {
        return Err(BrokerError::invalid_argument("record id must not be empty"));
    }
    Ok(())
}

/// Take the next record version, persisting the counter through the batch
/// so every caller within the batch observes the increments.
fn next_version(engine: &dyn Engine, batch: &mut Batch) -> BrokerResult<u64> {
    let current = match batch.read(engine, &metadata::latest_record_version_key())? {
        Some(value) => decode_u64(&value)?,
        None => 0,
    };
    let next = current + 1;
    batch.set(
        metadata::latest_record_version_key(),
        encode_u64(next).to_vec(),
    );
    Ok(next)
}

/// Write one record: replace the live entry and its modified-at index
/// entry, append to the change log, and index the change by type.
fn update_record(
    engine: &dyn Engine,
    batch: &mut Batch,
    rec: &mut proto::Record,
    now: Timestamp,
) -> BrokerResult<()> {
    if let Some(existing) = batch.read(engine, &record::key(&rec.r#type, &rec.id))? {
        let existing = decode_record(&existing)?;
        if let Some(modified_at) = &existing.modified_at {
            batch.delete(modified_at_index::key(
                &existing.r#type,
                modified_at.into(),
                &existing.id,
            ));
        }
    }

    rec.version = next_version(engine, batch)?;
    rec.modified_at = Some(now.into());

    batch.set(change::key(rec.version), rec.encode_to_vec());
    batch.set(change_index_by_type::key(&rec.r#type, rec.version), Vec::new());
    batch.set(record::key(&rec.r#type, &rec.id), rec.encode_to_vec());
    batch.set(modified_at_index::key(&rec.r#type, now, &rec.id), Vec::new());

    Ok(())
}

/// Delete one record: remove the live entry and its modified-at index
/// entry, and append a tombstone to the change feed. Returns the
/// tombstone as written. Deleting a record that does not exist writes
/// nothing and returns `None`, so repeated deletes produce exactly one
/// tombstone.
fn delete_record(
    engine: &dyn Engine,
    batch: &mut Batch,
    record_type: &str,
    id: &str,
    deleted_at: Option<prost_types::Timestamp>,
    now: Timestamp,
) -> BrokerResult<Option<proto::Record>> {
    let Some(existing) = batch.read(engine, &record::key(record_type, id))? else {
        return Ok(None);
    };
    let existing = decode_record(&existing)?;

    batch.delete(record::key(record_type, id));
    if let Some(modified_at) = &existing.modified_at {
        batch.delete(modified_at_index::key(record_type, modified_at.into(), id));
    }

    let mut tombstone = existing;
    tombstone.version = next_version(engine, batch)?;
    tombstone.modified_at = Some(now.into());
    tombstone.deleted_at = Some(deleted_at.unwrap_or_else(|| now.into()));

    batch.set(change::key(tombstone.version), tombstone.encode_to_vec());
    batch.set(
        change_index_by_type::key(record_type, tombstone.version),
        Vec::new(),
    );

    Ok(Some(tombstone))
}

/// Enforce the capacity option for a type: walk the modified-at index
/// newest first and delete everything past the capacity. Deletion goes
/// through [`delete_record`], so evictions appear as tombstones on the
/// change feed.
fn enforce_capacity(
    engine: &dyn Engine,
    batch: &mut Batch,
    record_type: &str,
    now: Timestamp,
) -> BrokerResult<()> {
    let capacity = match batch.read(engine, &options::key(record_type))? {
        Some(value) => proto::Options::decode(value.as_slice())
            .map_err(BrokerError::storage)?
            .capacity,
        None => None,
    };
    let Some(capacity) = capacity else {
        return Ok(());
    };

    let (lower, upper) = modified_at_index::bounds_for_type(record_type);
    let mut evict: Vec<(String, String)> = Vec::new();
    let mut count: u64 = 0;
    let mut scan_err = None;
    batch.scan(engine, &lower, &upper, ScanDirection::Reverse, &mut |key, _| {
        match modified_at_index::decode_key(key) {
            Ok((record_type, _, id)) => {
                count += 1;
                if count > capacity {
                    evict.push((record_type, id));
                }
                true
            }
            Err(err) => {
                scan_err = Some(err);
                false
            }
        }
    })?;
    if let Some(err) = scan_err {
        return Err(err);
    }

    for (record_type, id) in evict {
        let _ = delete_record(engine, batch, &record_type, &id, None, now)?;
    }

    Ok(())
}

/// Merge a patch payload into an existing payload at the mask's paths.
///
/// Both payloads must decode as protobuf `Struct`s. Each path is a dotted
/// path into the struct: the input's value at that path replaces the
/// existing value (intermediate objects are created), and a path missing
/// from the input clears the field.
fn merge_masked_data(
    existing: Option<&prost_types::Any>,
    input: Option<&prost_types::Any>,
    mask: &prost_types::FieldMask,
) -> BrokerResult<Option<prost_types::Any>> {
    let existing_struct = existing
        .and_then(proto::struct_from_any)
        .ok_or_else(|| BrokerError::invalid_argument("patch target data is not a struct"))?;
    let input_struct = input
        .and_then(proto::struct_from_any)
        .ok_or_else(|| BrokerError::invalid_argument("patch data is not a struct"))?;

    let mut merged = existing_struct;
    for path in &mask.paths {
        let parts: Vec<&str> = path.split('.').collect();
        match struct_get_path(&input_struct, &parts) {
            Some(value) => struct_set_path(&mut merged, &parts, value.clone()),
            None => struct_remove_path(&mut merged, &parts),
        }
    }

    Ok(Some(proto::any_from_struct(&merged)))
}

fn struct_get_path<'a>(s: &'a prost_types::Struct, parts: &[&str]) -> Option<&'a prost_types::Value> {
    let (first, rest) = parts.split_first()?;
    let value = s.fields.get(*first)?;
    if rest.is_empty() {
        return Some(value);
    }
    match &value.kind {
        Some(prost_types::value::Kind::StructValue(inner)) => struct_get_path(inner, rest),
        _ => None,
    }
}

fn struct_set_path(s: &mut prost_types::Struct, parts: &[&str], value: prost_types::Value) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        s.fields.insert(first.to_string(), value);
        return;
    }
    let entry = s
        .fields
        .entry(first.to_string())
        .or_insert_with(|| prost_types::Value {
            kind: Some(prost_types::value::Kind::StructValue(
                prost_types::Struct::default(),
            )),
        });
    if !matches!(entry.kind, Some(prost_types::value::Kind::StructValue(_))) {
        entry.kind = Some(prost_types::value::Kind::StructValue(
            prost_types::Struct::default(),
        ));
    }
    if let Some(prost_types::value::Kind::StructValue(inner)) = &mut entry.kind {
        struct_set_path(inner, rest, value);
    }
}

fn struct_remove_path(s: &mut prost_types::Struct, parts: &[&str]) {
    let Some((first, rest)) = parts.split_first() else {
        return;
    };
    if rest.is_empty() {
        s.fields.remove(*first);
        return;
    }
    if let Some(prost_types::Value {
        kind: Some(prost_types::value::Kind::StructValue(inner)),
    }) = s.fields.get_mut(*first)
    {
        struct_remove_path(inner, rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string_value(s: &str) -> prost_types::Value {
        prost_types::Value {
            kind: Some(prost_types::value::Kind::StringValue(s.to_string())),
        }
    }

    fn struct_of(fields: Vec<(&str, prost_types::Value)>) -> prost_types::Struct {
        prost_types::Struct {
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    #[test]
    fn merge_replaces_and_clears_masked_paths() {
        let existing = proto::any_from_struct(&struct_of(vec![
            ("a", string_value("1")),
            ("b", string_value("2")),
            ("c", string_value("3")),
        ]));
        let input = proto::any_from_struct(&struct_of(vec![("a", string_value("10"))]));
        let mask = prost_types::FieldMask {
            paths: vec!["a".into(), "b".into()],
        };

        let merged = merge_masked_data(Some(&existing), Some(&input), &mask)
            .unwrap()
            .unwrap();
        let merged = proto::struct_from_any(&merged).unwrap();
        assert_eq!(merged.fields.get("a"), Some(&string_value("10")));
        assert_eq!(merged.fields.get("b"), None, "missing input path clears");
        assert_eq!(merged.fields.get("c"), Some(&string_value("3")), "unmasked survives");
    }

    #[test]
    fn merge_creates_nested_paths() {
        let existing = proto::any_from_struct(&struct_of(vec![]));
        let input = proto::any_from_struct(&struct_of(vec![(
            "outer",
            prost_types::Value {
                kind: Some(prost_types::value::Kind::StructValue(struct_of(vec![(
                    "inner",
                    string_value("x"),
                )]))),
            },
        )]));
        let mask = prost_types::FieldMask {
            paths: vec!["outer.inner".into()],
        };

        let merged = merge_masked_data(Some(&existing), Some(&input), &mask)
            .unwrap()
            .unwrap();
        let merged = proto::struct_from_any(&merged).unwrap();
        let outer = match &merged.fields.get("outer").unwrap().kind {
            Some(prost_types::value::Kind::StructValue(s)) => s.clone(),
            other => panic!("expected struct, got {other:?}"),
        };
        assert_eq!(outer.fields.get("inner"), Some(&string_value("x")));
    }

    #[test]
    fn merge_rejects_non_struct_payloads() {
        let mask = prost_types::FieldMask { paths: vec!["a".into()] };
        assert!(merge_masked_data(None, None, &mask).is_err());
    }
}
