//! Keyspace codec.
//!
//! The store partitions a single ordered byte-keyed namespace with a
//! leading one-byte tag:
//!
//! | Tag | Keyspace                        | Key layout                                           |
//! |-----|---------------------------------|------------------------------------------------------|
//! | 1   | metadata                        | tag, field byte                                      |
//! | 2   | record                          | tag, type, 0x00, id                                  |
//! | 3   | record-index-by-modified-at     | tag, type, 0x00, modified_at (be u64 us), 0x00, id   |
//! | 4   | record-change                   | tag, version (be u64)                                |
//! | 5   | record-change-index-by-type     | tag, type, 0x00, version (be u64)                    |
//! | 6   | lease                           | tag, name                                            |
//! | 7   | options                         | tag, type                                            |
//!
//! All u64 values are big-endian so byte-lexicographic iteration orders
//! versions and timestamps numerically. Record types must not contain the
//! 0x00 separator; the store rejects them before encoding.

use crate::core::error::{BrokerError, BrokerResult};
use crate::core::time::Timestamp;

const TAG_METADATA: u8 = 1;
const TAG_RECORD: u8 = 2;
const TAG_RECORD_INDEX_BY_MODIFIED_AT: u8 = 3;
const TAG_RECORD_CHANGE: u8 = 4;
const TAG_RECORD_CHANGE_INDEX_BY_TYPE: u8 = 5;
const TAG_LEASE: u8 = 6;
const TAG_OPTIONS: u8 = 7;

const SEP: u8 = 0x00;

/// Encode a u64 big-endian.
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode a big-endian u64.
pub fn decode_u64(data: &[u8]) -> BrokerResult<u64> {
    let bytes: [u8; 8] = data
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| {
            BrokerError::invalid_argument(format!(
                "invalid uint64, expected 8 bytes, got {}",
                data.len()
            ))
        })?;
    Ok(u64::from_be_bytes(bytes))
}

/// Derive the exclusive upper bound for a prefix scan by incrementing the
/// last byte. Every Strata prefix ends in a tag or separator below 0xff,
/// so an increment always exists.
pub fn prefix_upper_bound(prefix: &[u8]) -> Vec<u8> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.last_mut() {
        if *last < 0xff {
            *last += 1;
            return upper;
        }
        upper.pop();
    }
    // Unreachable for well-formed prefixes; an empty bound scans nothing.
    upper
}

/// Metadata keyspace: fixed-width big-endian u64 fields.
pub mod metadata {
    use super::*;

    const FIELD_LATEST_RECORD_VERSION: u8 = 0x01;
    const FIELD_SERVER_VERSION: u8 = 0x02;
    const FIELD_MIGRATION: u8 = 0x03;

    pub fn latest_record_version_key() -> Vec<u8> {
        vec![TAG_METADATA, FIELD_LATEST_RECORD_VERSION]
    }

    pub fn server_version_key() -> Vec<u8> {
        vec![TAG_METADATA, FIELD_SERVER_VERSION]
    }

    pub fn migration_key() -> Vec<u8> {
        vec![TAG_METADATA, FIELD_MIGRATION]
    }
}

/// Record keyspace: live records keyed by `(type, id)`.
pub mod record {
    use super::*;

    pub fn key(record_type: &str, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + record_type.len() + 1 + id.len());
        key.push(TAG_RECORD);
        key.extend_from_slice(record_type.as_bytes());
        key.push(SEP);
        key.extend_from_slice(id.as_bytes());
        key
    }

    /// Bounds covering every record of every type.
    pub fn bounds() -> (Vec<u8>, Vec<u8>) {
        let lower = vec![TAG_RECORD];
        let upper = prefix_upper_bound(&lower);
        (lower, upper)
    }

    /// Bounds covering every record of one type.
    pub fn bounds_for_type(record_type: &str) -> (Vec<u8>, Vec<u8>) {
        let mut lower = Vec::with_capacity(1 + record_type.len() + 1);
        lower.push(TAG_RECORD);
        lower.extend_from_slice(record_type.as_bytes());
        lower.push(SEP);
        let upper = prefix_upper_bound(&lower);
        (lower, upper)
    }

    pub fn decode_key(key: &[u8]) -> BrokerResult<(String, String)> {
        let rest = key
            .strip_prefix(&[TAG_RECORD][..])
            .ok_or_else(|| BrokerError::invalid_argument("invalid record key, unexpected tag"))?;
        let sep = rest
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| BrokerError::invalid_argument("invalid record key, missing id"))?;
        let record_type = String::from_utf8_lossy(&rest[..sep]).into_owned();
        let id = String::from_utf8_lossy(&rest[sep + 1..]).into_owned();
        Ok((record_type, id))
    }
}

/// Record-index-by-modified-at keyspace: empty values; the key orders
/// records of a type by modification time (capacity eviction walks this
/// in reverse).
pub mod modified_at_index {
    use super::*;

    pub fn key(record_type: &str, modified_at: Timestamp, id: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + record_type.len() + 1 + 8 + 1 + id.len());
        key.push(TAG_RECORD_INDEX_BY_MODIFIED_AT);
        key.extend_from_slice(record_type.as_bytes());
        key.push(SEP);
        key.extend_from_slice(&encode_u64(modified_at.micros));
        key.push(SEP);
        key.extend_from_slice(id.as_bytes());
        key
    }

    pub fn bounds_for_type(record_type: &str) -> (Vec<u8>, Vec<u8>) {
        let mut lower = Vec::with_capacity(1 + record_type.len() + 1);
        lower.push(TAG_RECORD_INDEX_BY_MODIFIED_AT);
        lower.extend_from_slice(record_type.as_bytes());
        lower.push(SEP);
        let upper = prefix_upper_bound(&lower);
        (lower, upper)
    }

    pub fn decode_key(key: &[u8]) -> BrokerResult<(String, Timestamp, String)> {
        let rest = key
            .strip_prefix(&[TAG_RECORD_INDEX_BY_MODIFIED_AT][..])
            .ok_or_else(|| BrokerError::invalid_argument("invalid index key, unexpected tag"))?;
        let sep = rest
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| BrokerError::invalid_argument("invalid index key, missing type"))?;
        let record_type = String::from_utf8_lossy(&rest[..sep]).into_owned();
        let rest = &rest[sep + 1..];
        let modified_at = Timestamp::from_micros(decode_u64(rest)?);
        let rest = rest.get(9..).ok_or_else(|| {
            BrokerError::invalid_argument("invalid index key, missing record id")
        })?;
        let id = String::from_utf8_lossy(rest).into_owned();
        Ok((record_type, modified_at, id))
    }
}

/// Record-change keyspace: the change log, keyed by version, holding every
/// written record including tombstones.
pub mod change {
    use super::*;

    pub fn key(version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + 8);
        key.push(TAG_RECORD_CHANGE);
        key.extend_from_slice(&encode_u64(version));
        key
    }
}

/// Record-change-index-by-type keyspace: empty values; orders change-log
/// versions per record type so a sync can scan one type's changes.
pub mod change_index_by_type {
    use super::*;

    pub fn key(record_type: &str, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + record_type.len() + 1 + 8);
        key.push(TAG_RECORD_CHANGE_INDEX_BY_TYPE);
        key.extend_from_slice(record_type.as_bytes());
        key.push(SEP);
        key.extend_from_slice(&encode_u64(version));
        key
    }

    /// Bounds covering versions strictly greater than `after`.
    pub fn bounds_for_type_after(record_type: &str, after: u64) -> (Vec<u8>, Vec<u8>) {
        let lower = key(record_type, after.saturating_add(1));
        let mut prefix = Vec::with_capacity(1 + record_type.len() + 1);
        prefix.push(TAG_RECORD_CHANGE_INDEX_BY_TYPE);
        prefix.extend_from_slice(record_type.as_bytes());
        prefix.push(SEP);
        let upper = prefix_upper_bound(&prefix);
        (lower, upper)
    }

    pub fn decode_key(key: &[u8]) -> BrokerResult<(String, u64)> {
        let rest = key
            .strip_prefix(&[TAG_RECORD_CHANGE_INDEX_BY_TYPE][..])
            .ok_or_else(|| {
                BrokerError::invalid_argument("invalid change index key, unexpected tag")
            })?;
        let sep = rest.iter().position(|&b| b == SEP).ok_or_else(|| {
            BrokerError::invalid_argument("invalid change index key, missing type")
        })?;
        let record_type = String::from_utf8_lossy(&rest[..sep]).into_owned();
        let version = decode_u64(&rest[sep + 1..])?;
        Ok((record_type, version))
    }
}

/// Lease keyspace: `holder_id | 0x00 | expires_at (be u64 us)`.
pub mod lease {
    use super::*;

    pub fn key(name: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + name.len());
        key.push(TAG_LEASE);
        key.extend_from_slice(name.as_bytes());
        key
    }

    pub fn encode_value(holder_id: &str, expires_at: Timestamp) -> Vec<u8> {
        let mut value = Vec::with_capacity(holder_id.len() + 1 + 8);
        value.extend_from_slice(holder_id.as_bytes());
        value.push(SEP);
        value.extend_from_slice(&encode_u64(expires_at.micros));
        value
    }

    pub fn decode_value(value: &[u8]) -> BrokerResult<(String, Timestamp)> {
        let sep = value
            .iter()
            .position(|&b| b == SEP)
            .ok_or_else(|| BrokerError::invalid_argument("invalid lease value, missing expiry"))?;
        let holder_id = String::from_utf8_lossy(&value[..sep]).into_owned();
        let expires_at = Timestamp::from_micros(decode_u64(&value[sep + 1..])?);
        Ok((holder_id, expires_at))
    }
}

/// Options keyspace: per-type options as a serialized message.
pub mod options {
    use super::*;

    pub fn key(record_type: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(1 + record_type.len());
        key.push(TAG_OPTIONS);
        key.extend_from_slice(record_type.as_bytes());
        key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_key_round_trip() {
        let key = record::key("user", "u-123");
        assert_eq!(record::decode_key(&key).unwrap(), ("user".into(), "u-123".into()));
    }

    #[test]
    fn record_bounds_cover_type_only() {
        let (lower, upper) = record::bounds_for_type("a");
        assert!(record::key("a", "x") >= lower);
        assert!(record::key("a", "x") < upper);
        assert!(record::key("ab", "x") >= upper);
    }

    #[test]
    fn modified_at_index_orders_by_time() {
        let early = modified_at_index::key("t", Timestamp::from_micros(100), "b");
        let late = modified_at_index::key("t", Timestamp::from_micros(200), "a");
        assert!(early < late);

        let (record_type, ts, id) = modified_at_index::decode_key(&late).unwrap();
        assert_eq!(record_type, "t");
        assert_eq!(ts, Timestamp::from_micros(200));
        assert_eq!(id, "a");
    }

    #[test]
    fn change_index_orders_by_version() {
        let a = change_index_by_type::key("t", 5);
        let b = change_index_by_type::key("t", 6);
        assert!(a < b);

        let (lower, upper) = change_index_by_type::bounds_for_type_after("t", 5);
        assert!(a < lower);
        assert!(b >= lower && b < upper);
    }

    #[test]
    fn lease_value_round_trip() {
        let value = lease::encode_value("holder-1", Timestamp::from_micros(42));
        assert_eq!(
            lease::decode_value(&value).unwrap(),
            ("holder-1".into(), Timestamp::from_micros(42))
        );
    }

    #[test]
    fn upper_bound_increments_last_byte() {
        assert_eq!(prefix_upper_bound(&[2, b'a', 0x00]), vec![2, b'a', 0x01]);
        assert_eq!(prefix_upper_bound(&[2, 0xff]), vec![3]);
    }
}
