//! Tests for the record store: CRUD, options, capacity, and leases.

mod common;

use std::time::Duration;

use common::{deleted, make_record, new_store};
use strata::proto;
use strata::time::Timestamp;
use strata::BrokerError;

#[test]
fn put_round_trips_records() {
    let store = new_store();
    let before = Timestamp::now();
    let (_, written) = store.put(None, &[make_record("user", "u1", "alice")]).unwrap();
    let after = Timestamp::now();

    assert_eq!(written.len(), 1);
    assert!(written[0].version > 0);

    let got = store.get("user", "u1").unwrap();
    assert_eq!(got, written[0]);
    assert_eq!(got.data, make_record("user", "u1", "alice").data);

    let modified_at = Timestamp::from(got.modified_at.as_ref().unwrap());
    assert!(modified_at >= before && modified_at <= after);
}

#[test]
fn get_missing_record_is_not_found() {
    let store = new_store();
    assert!(matches!(
        store.get("user", "nope"),
        Err(BrokerError::NotFound)
    ));
}

#[test]
fn versions_are_strictly_increasing_and_times_non_decreasing() {
    let store = new_store();
    let mut written = Vec::new();
    for i in 0..10 {
        let record_type = if i % 2 == 0 { "a" } else { "b" };
        let (_, mut recs) = store
            .put(None, &[make_record(record_type, &format!("r{i}"), "x")])
            .unwrap();
        written.append(&mut recs);
    }

    for pair in written.windows(2) {
        assert!(pair[1].version > pair[0].version);
        let t0 = Timestamp::from(pair[0].modified_at.as_ref().unwrap());
        let t1 = Timestamp::from(pair[1].modified_at.as_ref().unwrap());
        assert!(t1 >= t0);
    }

    assert_eq!(store.latest_record_version().unwrap(), 10);
}

#[test]
fn update_replaces_existing_record() {
    let store = new_store();
    let (_, first) = store.put(None, &[make_record("t", "1", "old")]).unwrap();
    let (_, second) = store.put(None, &[make_record("t", "1", "new")]).unwrap();
    assert!(second[0].version > first[0].version);

    let got = store.get("t", "1").unwrap();
    assert_eq!(got.data, make_record("t", "1", "new").data);
    assert_eq!(got.version, second[0].version);
}

#[test]
fn list_types_is_sorted_and_unique() {
    let store = new_store();
    store
        .put(
            None,
            &[
                make_record("zebra", "1", "x"),
                make_record("ant", "1", "x"),
                make_record("ant", "2", "x"),
            ],
        )
        .unwrap();

    assert_eq!(store.list_types().unwrap(), vec!["ant", "zebra"]);
}

#[test]
fn put_rejects_malformed_records() {
    let store = new_store();
    assert!(matches!(
        store.put(None, &[make_record("", "1", "x")]),
        Err(BrokerError::InvalidArgument { .. })
    ));
    assert!(matches!(
        store.put(None, &[make_record("with\0sep", "1", "x")]),
        Err(BrokerError::InvalidArgument { .. })
    ));
    assert!(matches!(
        store.put(None, &[make_record("t", "", "x")]),
        Err(BrokerError::InvalidArgument { .. })
    ));
}

#[test]
fn put_checks_expected_server_version() {
    let store = new_store();
    let server_version = store.server_version().unwrap();

    let err = store
        .put(Some(server_version + 1), &[make_record("t", "1", "x")])
        .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidServerVersion { .. }));

    let (sv, _) = store
        .put(Some(server_version), &[make_record("t", "1", "x")])
        .unwrap();
    assert_eq!(sv, server_version);
}

#[test]
fn delete_is_idempotent() {
    let store = new_store();
    store.put(None, &[make_record("t", "1", "x")]).unwrap();
    let after_put = store.latest_record_version().unwrap();

    store
        .put(None, &[deleted(make_record("t", "1", "x"))])
        .unwrap();
    let after_delete = store.latest_record_version().unwrap();
    assert_eq!(after_delete, after_put + 1, "delete appends one tombstone");
    assert!(matches!(store.get("t", "1"), Err(BrokerError::NotFound)));

    // A second delete of the same record does nothing.
    store
        .put(None, &[deleted(make_record("t", "1", "x"))])
        .unwrap();
    assert_eq!(store.latest_record_version().unwrap(), after_delete);
}

#[test]
fn delete_returns_the_assigned_tombstone() {
    let store = new_store();
    let (_, written) = store.put(None, &[make_record("t", "1", "x")]).unwrap();
    let live_version = written[0].version;

    let (_, out) = store
        .put(None, &[deleted(make_record("t", "1", "x"))])
        .unwrap();
    assert_eq!(out.len(), 1);
    assert!(out[0].deleted_at.is_some());
    assert!(
        out[0].version > live_version,
        "the tombstone carries a newly assigned version"
    );
    assert_eq!(out[0].version, store.latest_record_version().unwrap());

    // A deletion that matched nothing writes nothing and returns nothing.
    let (_, out) = store
        .put(None, &[deleted(make_record("t", "missing", "x"))])
        .unwrap();
    assert!(out.is_empty());
}

#[test]
fn options_round_trip_and_empty_options_reset() {
    let store = new_store();
    assert!(store.get_options("t").unwrap().is_empty());

    store
        .set_options("t", &proto::Options { capacity: Some(3) })
        .unwrap();
    assert_eq!(store.get_options("t").unwrap().capacity, Some(3));

    store.set_options("t", &proto::Options::default()).unwrap();
    assert!(store.get_options("t").unwrap().is_empty());
}

#[test]
fn capacity_evicts_oldest_records() {
    let store = new_store();
    for i in 1..=5 {
        store
            .put(None, &[make_record("x", &format!("{i}"), "v")])
            .unwrap();
        // Separate the modified-at index entries.
        std::thread::sleep(Duration::from_millis(2));
    }

    store
        .set_options("x", &proto::Options { capacity: Some(3) })
        .unwrap();

    // The next write for the type triggers enforcement; re-putting "5"
    // leaves five live records, so the two oldest are evicted.
    store.put(None, &[make_record("x", "5", "v2")]).unwrap();

    assert!(matches!(store.get("x", "1"), Err(BrokerError::NotFound)));
    assert!(matches!(store.get("x", "2"), Err(BrokerError::NotFound)));
    store.get("x", "3").unwrap();
    store.get("x", "4").unwrap();
    store.get("x", "5").unwrap();

    let (_, _, live) = store.sync_latest("x", None).unwrap();
    assert_eq!(live.len(), 3);
}

#[test]
fn capacity_applies_within_a_single_batch() {
    let store = new_store();
    store
        .set_options("x", &proto::Options { capacity: Some(2) })
        .unwrap();

    let records: Vec<_> = (1..=4).map(|i| make_record("x", &format!("{i}"), "v")).collect();
    store.put(None, &records).unwrap();

    let (_, _, live) = store.sync_latest("x", None).unwrap();
    assert_eq!(live.len(), 2);
}

#[test]
fn patch_merges_masked_fields_and_skips_missing_records() {
    let store = new_store();
    let data = common::struct_of(vec![
        ("a", common::string_value("1")),
        ("b", common::string_value("2")),
    ]);
    store
        .put(
            None,
            &[proto::Record::new("t", "1", Some(proto::any_from_struct(&data)))],
        )
        .unwrap();

    let patch_data = common::struct_of(vec![("a", common::string_value("10"))]);
    let mask = prost_types::FieldMask {
        paths: vec!["a".into()],
    };
    let inputs = vec![
        proto::Record::new("t", "1", Some(proto::any_from_struct(&patch_data))),
        proto::Record::new("t", "missing", Some(proto::any_from_struct(&patch_data))),
    ];
    let (_, patched) = store.patch(None, &inputs, &mask).unwrap();
    assert_eq!(patched.len(), 1, "missing records are silently skipped");

    let got = store.get("t", "1").unwrap();
    let merged = proto::struct_from_any(got.data.as_ref().unwrap()).unwrap();
    assert_eq!(merged.fields.get("a"), Some(&common::string_value("10")));
    assert_eq!(merged.fields.get("b"), Some(&common::string_value("2")));
}

#[test]
fn patch_ignores_deletion_inputs() {
    let store = new_store();
    store.put(None, &[make_record("t", "1", "x")]).unwrap();

    let mask = prost_types::FieldMask {
        paths: vec!["v".into()],
    };
    let (_, patched) = store
        .patch(None, &[deleted(make_record("t", "1", "y"))], &mask)
        .unwrap();
    assert!(patched.is_empty());
    store.get("t", "1").unwrap();
}

#[test]
fn lease_acquire_renew_and_expiry() {
    let store = new_store();

    // First acquisition wins; a second holder is rejected.
    assert!(store.lease("L", "holder1", Duration::from_millis(100)).unwrap());
    assert!(!store.lease("L", "holder2", Duration::from_millis(100)).unwrap());

    // The current holder may renew.
    assert!(store.lease("L", "holder1", Duration::from_millis(100)).unwrap());

    // After expiry, any requester may take the lease over.
    std::thread::sleep(Duration::from_millis(150));
    assert!(store.lease("L", "holder2", Duration::from_millis(100)).unwrap());
    assert!(!store.lease("L", "holder1", Duration::from_millis(100)).unwrap());
}

#[test]
fn lease_with_zero_ttl_releases() {
    let store = new_store();
    assert!(store.lease("L", "holder1", Duration::from_secs(60)).unwrap());
    assert!(store.lease("L", "holder1", Duration::ZERO).unwrap());
    assert!(store.lease("L", "holder2", Duration::from_secs(60)).unwrap());
}

#[test]
fn persistent_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let dsn = format!("file://{}", dir.path().display());

    let server_version;
    {
        let store = strata::Store::open(&dsn).unwrap();
        server_version = store.server_version().unwrap();
        store.put(None, &[make_record("t", "1", "persisted")]).unwrap();
    }

    let store = strata::Store::open(&dsn).unwrap();
    assert_eq!(store.server_version().unwrap(), server_version);
    let got = store.get("t", "1").unwrap();
    assert_eq!(got.data, make_record("t", "1", "persisted").data);
}
