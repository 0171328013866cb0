//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;` in
//! test files.

#![allow(dead_code)]

use std::sync::Arc;

use strata::proto;
use strata::Store;

/// Open an ephemeral store.
pub fn new_store() -> Arc<Store> {
    Store::open("memory://").expect("failed to open memory store")
}

/// A string `Value`.
pub fn string_value(s: &str) -> prost_types::Value {
    prost_types::Value {
        kind: Some(prost_types::value::Kind::StringValue(s.to_string())),
    }
}

/// A struct `Value`.
pub fn struct_value(s: prost_types::Struct) -> prost_types::Value {
    prost_types::Value {
        kind: Some(prost_types::value::Kind::StructValue(s)),
    }
}

/// A list `Value`.
pub fn list_value(values: Vec<prost_types::Value>) -> prost_types::Value {
    prost_types::Value {
        kind: Some(prost_types::value::Kind::ListValue(prost_types::ListValue {
            values,
        })),
    }
}

/// Build a `Struct` from field pairs.
pub fn struct_of(fields: Vec<(&str, prost_types::Value)>) -> prost_types::Struct {
    prost_types::Struct {
        fields: fields
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    }
}

/// A record whose data payload is the struct `{"v": <value>}`.
pub fn make_record(record_type: &str, id: &str, value: &str) -> proto::Record {
    let data = struct_of(vec![("v", string_value(value))]);
    proto::Record::new(record_type, id, Some(proto::any_from_struct(&data)))
}

/// A record carrying a `$index.cidr` attribute.
pub fn record_with_cidr(record_type: &str, id: &str, cidr: &str) -> proto::Record {
    let data = struct_of(vec![(
        "$index",
        struct_value(struct_of(vec![("cidr", string_value(cidr))])),
    )]);
    proto::Record::new(record_type, id, Some(proto::any_from_struct(&data)))
}

/// A tombstone input for the given record.
pub fn deleted(mut rec: proto::Record) -> proto::Record {
    rec.deleted_at = Some(strata::time::Timestamp::now().into());
    rec
}
