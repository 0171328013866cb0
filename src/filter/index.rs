//! Record index attributes.
//!
//! A record's data payload may carry a reserved top-level `$index`
//! attribute whose `cidr` sub-attribute is a textual CIDR prefix. A
//! `$index` equality matches when the record's prefix contains the
//! queried address, or contains (or equals) the queried prefix. Records
//! without a parseable `$index.cidr` never match.

use std::net::IpAddr;

use ipnet::IpNet;

use crate::proto;

const INDEX_FIELD: &str = "$index";
const CIDR_FIELD: &str = "cidr";

/// Get a record's `$index` attribute, if its data payload is a struct
/// carrying one.
pub fn record_index(rec: &proto::Record) -> Option<prost_types::Struct> {
    let data = rec.data.as_ref()?;
    let s = proto::struct_from_any(data)?;
    match &s.fields.get(INDEX_FIELD)?.kind {
        Some(prost_types::value::Kind::StructValue(index)) => Some(index.clone()),
        _ => None,
    }
}

/// Get a record's `$index.cidr` prefix. Missing or unparseable values
/// yield `None`.
pub fn record_index_cidr(rec: &proto::Record) -> Option<IpNet> {
    let index = record_index(rec)?;
    match &index.fields.get(CIDR_FIELD)?.kind {
        Some(prost_types::value::Kind::StringValue(cidr)) => cidr.parse().ok(),
        _ => None,
    }
}

/// Check if the record's prefix is a supernet of (or equal to) the
/// queried prefix.
pub fn record_matches_ip_prefix(rec: &proto::Record, prefix: IpNet) -> bool {
    match record_index_cidr(rec) {
        Some(cidr) => cidr.contains(&prefix),
        None => false,
    }
}

/// Check if the record's prefix contains the queried address.
pub fn record_matches_ip_addr(rec: &proto::Record, addr: IpAddr) -> bool {
    match record_index_cidr(rec) {
        Some(cidr) => cidr.contains(&addr),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_cidr(cidr: &str) -> proto::Record {
        let index = prost_types::Struct {
            fields: [(
                CIDR_FIELD.to_string(),
                prost_types::Value {
                    kind: Some(prost_types::value::Kind::StringValue(cidr.to_string())),
                },
            )]
            .into_iter()
            .collect(),
        };
        let data = prost_types::Struct {
            fields: [(
                INDEX_FIELD.to_string(),
                prost_types::Value {
                    kind: Some(prost_types::value::Kind::StructValue(index)),
                },
            )]
            .into_iter()
            .collect(),
        };
        proto::Record::new("t", "1", Some(proto::any_from_struct(&data)))
    }

    #[test]
    fn extracts_cidr() {
        let rec = record_with_cidr("10.0.0.0/8");
        assert_eq!(record_index_cidr(&rec), Some("10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn no_index_never_matches() {
        let rec = proto::Record::new("t", "1", None);
        assert!(!record_matches_ip_addr(&rec, "10.0.0.1".parse().unwrap()));
        assert!(!record_matches_ip_prefix(&rec, "10.0.0.0/8".parse().unwrap()));
    }

    #[test]
    fn prefix_containment() {
        let rec = record_with_cidr("10.0.0.0/8");
        assert!(record_matches_ip_addr(&rec, "10.1.2.3".parse().unwrap()));
        assert!(!record_matches_ip_addr(&rec, "11.0.0.1".parse().unwrap()));
        assert!(record_matches_ip_prefix(&rec, "10.0.0.0/8".parse().unwrap()));
        assert!(record_matches_ip_prefix(&rec, "10.1.0.0/16".parse().unwrap()));
        assert!(!record_matches_ip_prefix(&rec, "0.0.0.0/0".parse().unwrap()));
    }
}
