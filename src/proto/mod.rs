//! Wire types for the record broker protocol.
//!
//! The broker messages are defined directly in Rust with prost derives
//! rather than generated from `.proto` files (see build.rs). Well-known
//! types (`Any`, `Struct`, `Timestamp`, `Duration`, `FieldMask`) come from
//! `prost-types`, so payloads interoperate with protobuf tooling.

use prost::Message;

/// A versioned record. `(type, id)` identifies the record; `version` and
/// `modified_at` are assigned by the store at write time. A record with
/// `deleted_at` set is a tombstone: present in the change feed, absent
/// from live views.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Record {
    #[prost(uint64, tag = "1")]
    pub version: u64,
    #[prost(string, tag = "2")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "4")]
    pub data: ::core::option::Option<::prost_types::Any>,
    #[prost(message, optional, tag = "5")]
    pub modified_at: ::core::option::Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "6")]
    pub deleted_at: ::core::option::Option<::prost_types::Timestamp>,
}

/// Per-record-type options.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Options {
    /// Maximum number of live records retained for the type. When
    /// exceeded, the records with the oldest `modified_at` are evicted.
    #[prost(uint64, optional, tag = "1")]
    pub capacity: ::core::option::Option<u64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetRequest {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetResponse {
    #[prost(message, optional, tag = "1")]
    pub record: ::core::option::Option<Record>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryRequest {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub filter: ::core::option::Option<::prost_types::Struct>,
    #[prost(uint64, tag = "3")]
    pub offset: u64,
    #[prost(uint64, tag = "4")]
    pub limit: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct QueryResponse {
    #[prost(message, repeated, tag = "1")]
    pub records: ::prost::alloc::vec::Vec<Record>,
    #[prost(uint64, tag = "2")]
    pub total_count: u64,
    #[prost(uint64, tag = "3")]
    pub server_version: u64,
    #[prost(uint64, tag = "4")]
    pub record_version: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutRequest {
    #[prost(message, repeated, tag = "1")]
    pub records: ::prost::alloc::vec::Vec<Record>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PutResponse {
    #[prost(uint64, tag = "1")]
    pub server_version: u64,
    #[prost(message, repeated, tag = "2")]
    pub records: ::prost::alloc::vec::Vec<Record>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PatchRequest {
    #[prost(message, repeated, tag = "1")]
    pub records: ::prost::alloc::vec::Vec<Record>,
    #[prost(message, optional, tag = "2")]
    pub field_mask: ::core::option::Option<::prost_types::FieldMask>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PatchResponse {
    #[prost(uint64, tag = "1")]
    pub server_version: u64,
    /// Records that were actually patched. Inputs with no existing record
    /// are skipped and do not appear here.
    #[prost(message, repeated, tag = "2")]
    pub records: ::prost::alloc::vec::Vec<Record>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetOptionsRequest {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub options: ::core::option::Option<Options>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SetOptionsResponse {
    #[prost(message, optional, tag = "1")]
    pub options: ::core::option::Option<Options>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireLeaseRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub duration: ::core::option::Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct AcquireLeaseResponse {
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenewLeaseRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "3")]
    pub duration: ::core::option::Option<::prost_types::Duration>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RenewLeaseResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseLeaseRequest {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ReleaseLeaseResponse {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTypesRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ListTypesResponse {
    #[prost(string, repeated, tag = "1")]
    pub types: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfoRequest {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ServerInfoResponse {
    #[prost(uint64, tag = "1")]
    pub server_version: u64,
    #[prost(uint64, tag = "2")]
    pub latest_record_version: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncRequest {
    #[prost(uint64, tag = "1")]
    pub server_version: u64,
    #[prost(uint64, tag = "2")]
    pub record_version: u64,
    #[prost(string, tag = "3")]
    pub r#type: ::prost::alloc::string::String,
    /// When true the stream blocks for new changes after draining the
    /// change log; when false it ends instead.
    #[prost(bool, tag = "4")]
    pub wait: bool,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncResponse {
    #[prost(message, optional, tag = "1")]
    pub record: ::core::option::Option<Record>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncLatestRequest {
    #[prost(string, tag = "1")]
    pub r#type: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub filter: ::core::option::Option<::prost_types::Struct>,
}

/// Snapshot cursor returned at the end of a SyncLatest stream. Callers
/// tail from here with `Sync(record_version = latest_record_version)`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Versions {
    #[prost(uint64, tag = "1")]
    pub server_version: u64,
    #[prost(uint64, tag = "2")]
    pub latest_record_version: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SyncLatestResponse {
    #[prost(oneof = "sync_latest_response::Response", tags = "1, 2")]
    pub response: ::core::option::Option<sync_latest_response::Response>,
}

pub mod sync_latest_response {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Response {
        #[prost(message, tag = "1")]
        Record(super::Record),
        /// Sent once, after all snapshot records.
        #[prost(message, tag = "2")]
        Versions(super::Versions),
    }
}

impl Record {
    /// Create a record with the given type, id, and data payload.
    pub fn new(
        record_type: impl Into<String>,
        id: impl Into<String>,
        data: Option<prost_types::Any>,
    ) -> Self {
        Self {
            version: 0,
            r#type: record_type.into(),
            id: id.into(),
            data,
            modified_at: None,
            deleted_at: None,
        }
    }

    /// Check if this record is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Options {
    /// Check if these options equal the empty default.
    pub fn is_empty(&self) -> bool {
        *self == Options::default()
    }
}

/// Order records by `(type, id)`.
pub fn compare_records_by_type_and_id(x: &Record, y: &Record) -> std::cmp::Ordering {
    x.r#type.cmp(&y.r#type).then_with(|| x.id.cmp(&y.id))
}

/// Type URL used for `Any`-wrapped `google.protobuf.Struct` payloads.
pub const STRUCT_TYPE_URL: &str = "type.googleapis.com/google.protobuf.Struct";
/// Type URL used for `Any`-wrapped `google.protobuf.Value` payloads.
pub const VALUE_TYPE_URL: &str = "type.googleapis.com/google.protobuf.Value";

/// Wrap a `Struct` payload in an `Any`.
pub fn any_from_struct(s: &prost_types::Struct) -> prost_types::Any {
    prost_types::Any {
        type_url: STRUCT_TYPE_URL.to_string(),
        value: s.encode_to_vec(),
    }
}

/// Unwrap an `Any` payload into a `Struct`, if it holds one (either
/// directly or as a struct-valued `Value`). Undecodable payloads yield
/// `None` rather than an error.
pub fn struct_from_any(any: &prost_types::Any) -> Option<prost_types::Struct> {
    if any.type_url.ends_with("google.protobuf.Struct") {
        return prost_types::Struct::decode(any.value.as_slice()).ok();
    }
    if any.type_url.ends_with("google.protobuf.Value") {
        let value = prost_types::Value::decode(any.value.as_slice()).ok()?;
        if let Some(prost_types::value::Kind::StructValue(s)) = value.kind {
            return Some(s);
        }
    }
    None
}
