//! Error types and gRPC status mapping.
//!
//! Strata defines the error conditions surfaced by the record store and
//! maps them to gRPC status codes at the RPC boundary. Storage-engine
//! failures bubble up unchanged as `Storage`; the store performs no
//! automatic retries (callers retry `InvalidServerVersion` by re-seeding
//! through `SyncLatest`).

use thiserror::Error;

/// Error conditions surfaced by the record broker core.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The requested record or lease does not exist.
    #[error("record not found")]
    NotFound,

    /// A sync caller passed a server version that does not match the
    /// store's current server version.
    #[error("invalid server version: expected {expected}, got {observed}")]
    InvalidServerVersion { expected: u64, observed: u64 },

    /// Malformed input: empty type or id, a record type containing the
    /// 0x00 keyspace separator, an unparseable filter, or an invalid CIDR.
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// A filter equals-expression referenced a path other than `type`,
    /// `id`, or `$index`.
    #[error("unsupported filter expression: {path}")]
    UnsupportedFilter { path: String },

    /// The caller canceled the operation.
    #[error("operation canceled")]
    Canceled,

    /// The underlying storage engine failed.
    #[error("storage engine: {message}")]
    Storage { message: String },

    /// A forwarded request exceeded the hop limit.
    #[error("request forwarded for {chain} which exceeds the maximum number of forwards ({max})")]
    ForwardLimitExceeded { chain: String, max: usize },
}

impl BrokerError {
    /// Create an InvalidArgument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an UnsupportedFilter error from a dotted filter path.
    pub fn unsupported_filter(path: &[String]) -> Self {
        Self::UnsupportedFilter {
            path: path.join("."),
        }
    }

    /// Create a Storage error.
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage {
            message: message.to_string(),
        }
    }

    /// Map this error to a gRPC status.
    pub fn to_status(&self) -> tonic::Status {
        match self {
            Self::NotFound => tonic::Status::not_found(self.to_string()),
            Self::InvalidServerVersion { .. } => tonic::Status::aborted(self.to_string()),
            Self::InvalidArgument { message } => tonic::Status::invalid_argument(message.clone()),
            Self::UnsupportedFilter { .. } => tonic::Status::invalid_argument(self.to_string()),
            Self::Canceled => tonic::Status::cancelled(self.to_string()),
            Self::Storage { message } => tonic::Status::internal(message.clone()),
            Self::ForwardLimitExceeded { .. } => {
                tonic::Status::failed_precondition(self.to_string())
            }
        }
    }
}

impl From<BrokerError> for tonic::Status {
    fn from(e: BrokerError) -> Self {
        e.to_status()
    }
}

/// Result type using BrokerError.
pub type BrokerResult<T> = Result<T, BrokerError>;
