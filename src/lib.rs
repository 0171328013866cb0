//! Strata - a versioned, type-partitioned record broker.
//!
//! Strata is an embedded record store that serves point queries and
//! streaming change feeds to many concurrent subscribers, with
//! capacity-bounded record types, cooperative leases, and a
//! filter-expression query language over semi-structured payloads.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       gRPC Surface (rpc)                        │
//! │   Get │ Query │ Put │ Patch │ Leases │ Sync │ SyncLatest        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Record Store (store)                       │
//! │   versioned records │ change log │ capacity │ leases │ notify   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Keyspace Codec (store::keyspace)             │
//! │        tagged keyspaces over one ordered byte namespace         │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Storage Engine (engine)                     │
//! │            memory:// (BTreeMap)  │  file:// (RocksDB)           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Alongside the store: the filter language ([`filter`]), the sorted
//! collection reconciler ([`reconcile`]), and the queriers ([`query`]).
//!
//! # Module Organization
//!
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::error`] - Error taxonomy and gRPC status mapping
//! - [`core::time`] - Microsecond timestamps
//! - [`engine`] - Ordered key-value engine abstraction and backends
//! - [`store`] - The record store: CRUD, options, leases, change feeds
//! - [`store::sync`] - Resumable change-feed streams
//! - [`filter`] - Filter AST, DNF normalization, CIDR index matching
//! - [`reconcile`] - Sorted-collection reconciliation
//! - [`query`] - Static, snapshot, and change-feed-mirroring queriers
//! - [`proto`] - Wire types for the broker protocol
//! - [`rpc`] - gRPC service, server, and forwarding variant
//! - [`cli`] - Command-line interface
//!
//! # Key Invariants
//!
//! - Record versions are assigned by a single store-wide counter and are
//!   never reused; change-feed subscribers observe strictly increasing
//!   versions.
//! - A live record always has both its record entry and its modified-at
//!   index entry; a deleted record has neither.
//! - Capacity enforcement keeps, per type, exactly the records with the
//!   largest modification times.
//! - The change notifier fires only after a successful commit.

// Core infrastructure
pub mod core;

// Storage engines
pub mod engine;

// Record store
pub mod store;

// Filter expressions
pub mod filter;

// Sorted-collection reconciliation
pub mod reconcile;

// Queriers
pub mod query;

// Wire types
pub mod proto;

// gRPC surface
pub mod rpc;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, time};
pub use engine::{Engine, MemoryEngine, RocksEngine};
pub use error::{BrokerError, BrokerResult};
pub use filter::{filter_to_dnf, Dnf, EqualsExpression, FilterExpression};
pub use query::{Querier, StaticQuerier, StoreQuerier, SyncQuerier};
pub use reconcile::{reconcile, RecordChange, RecordSet};
pub use store::{sync::SyncStream, Store};
