//! Tests for filter parsing, DNF normalization, and record matching.

mod common;

use common::{list_value, make_record, record_with_cidr, string_value, struct_of, struct_value};
use strata::{filter_to_dnf, BrokerError, EqualsExpression, FilterExpression};

fn eq(path: &[&str], value: &str) -> FilterExpression {
    FilterExpression::Equals(EqualsExpression {
        path: path.iter().map(|s| s.to_string()).collect(),
        value: value.to_string(),
    })
}

#[test]
fn parses_operators_paths_and_arrays() {
    let s = struct_of(vec![
        (
            "$and",
            list_value(vec![struct_value(struct_of(vec![(
                "a",
                struct_value(struct_of(vec![("b", string_value("1"))])),
            )]))]),
        ),
        (
            "c",
            struct_value(struct_of(vec![(
                "d",
                struct_value(struct_of(vec![(
                    "e",
                    struct_value(struct_of(vec![("$eq", string_value("2"))])),
                )])),
            )])),
        ),
        (
            "f",
            list_value(vec![
                string_value("3"),
                string_value("4"),
                string_value("5"),
            ]),
        ),
        (
            "$or",
            list_value(vec![
                struct_value(struct_of(vec![("g", string_value("6"))])),
                struct_value(struct_of(vec![("h", string_value("7"))])),
            ]),
        ),
    ]);

    let expr = FilterExpression::from_struct(&s).unwrap();
    assert_eq!(
        expr,
        FilterExpression::And(vec![
            eq(&["a", "b"], "1"),
            FilterExpression::Or(vec![eq(&["g"], "6"), eq(&["h"], "7")]),
            eq(&["c", "d", "e"], "2"),
            FilterExpression::Or(vec![
                eq(&["f"], "3"),
                eq(&["f"], "4"),
                eq(&["f"], "5")
            ]),
        ])
    );
}

#[test]
fn coerces_primitives_to_strings() {
    let s = struct_of(vec![
        (
            "b",
            prost_types::Value {
                kind: Some(prost_types::value::Kind::BoolValue(true)),
            },
        ),
        (
            "n",
            prost_types::Value {
                kind: Some(prost_types::value::Kind::NumberValue(2.0)),
            },
        ),
        (
            "z",
            prost_types::Value {
                kind: Some(prost_types::value::Kind::NullValue(0)),
            },
        ),
    ]);

    let expr = FilterExpression::from_struct(&s).unwrap();
    assert_eq!(
        expr,
        FilterExpression::And(vec![
            eq(&["b"], "true"),
            eq(&["n"], "2"),
            eq(&["z"], "<nil>"),
        ])
    );
}

#[test]
fn rejects_non_array_operators() {
    let s = struct_of(vec![("$and", string_value("nope"))]);
    assert!(FilterExpression::from_struct(&s).is_err());
    let s = struct_of(vec![("$or", string_value("nope"))]);
    assert!(FilterExpression::from_struct(&s).is_err());
}

#[test]
fn or_of_values_with_and_key_normalizes_to_dnf() {
    // {"$or":[{"a":"1"},{"a":"2"}],"b":"3"}
    let s = struct_of(vec![
        (
            "$or",
            list_value(vec![
                struct_value(struct_of(vec![("a", string_value("1"))])),
                struct_value(struct_of(vec![("a", string_value("2"))])),
            ]),
        ),
        ("b", string_value("3")),
    ]);
    let expr = FilterExpression::from_struct(&s).unwrap();
    let dnf = filter_to_dnf(Some(&expr));
    assert_eq!(dnf.to_string(), "(a=1&b=3)|(a=2&b=3)");
}

#[test]
fn equivalent_filters_share_a_canonical_dnf() {
    // (a=1 | b=2) & c=3, written two ways.
    let first = FilterExpression::And(vec![
        FilterExpression::Or(vec![eq(&["a"], "1"), eq(&["b"], "2")]),
        eq(&["c"], "3"),
    ]);
    let second = FilterExpression::Or(vec![
        FilterExpression::And(vec![eq(&["c"], "3"), eq(&["a"], "1")]),
        FilterExpression::And(vec![
            FilterExpression::And(vec![eq(&["b"], "2")]),
            eq(&["c"], "3"),
        ]),
    ]);

    let first = filter_to_dnf(Some(&first));
    let second = filter_to_dnf(Some(&second));
    assert_eq!(first.to_string(), second.to_string());
}

#[test]
fn duplicate_conjuncts_compact() {
    let expr = FilterExpression::Or(vec![
        eq(&["a"], "1"),
        eq(&["a"], "1"),
        FilterExpression::And(vec![eq(&["a"], "1"), eq(&["a"], "1")]),
    ]);
    assert_eq!(filter_to_dnf(Some(&expr)).to_string(), "(a=1)");
}

#[test]
fn matches_type_and_id_paths() {
    let rec = make_record("session", "s-1", "x");

    let dnf = filter_to_dnf(Some(&eq(&["type"], "session")));
    assert!(dnf.matches_record(&rec).unwrap());

    let dnf = filter_to_dnf(Some(&FilterExpression::And(vec![
        eq(&["type"], "session"),
        eq(&["id"], "s-1"),
    ])));
    assert!(dnf.matches_record(&rec).unwrap());

    let dnf = filter_to_dnf(Some(&eq(&["id"], "other")));
    assert!(!dnf.matches_record(&rec).unwrap());
}

#[test]
fn unsupported_paths_fail_the_query() {
    let rec = make_record("t", "1", "x");
    let expr = eq(&["data", "v"], "x");
    assert!(matches!(
        expr.matches_record(&rec),
        Err(BrokerError::UnsupportedFilter { .. })
    ));
}

#[test]
fn cidr_index_matching() {
    let rec = record_with_cidr("t", "1", "10.0.0.0/8");

    // Addresses inside the recorded prefix match.
    assert!(eq(&["$index"], "10.1.2.3").matches_record(&rec).unwrap());
    assert!(!eq(&["$index"], "11.0.0.1").matches_record(&rec).unwrap());

    // Prefixes contained within (or equal to) the recorded prefix match.
    assert!(eq(&["$index"], "10.0.0.0/8").matches_record(&rec).unwrap());
    assert!(eq(&["$index"], "10.64.0.0/10").matches_record(&rec).unwrap());
    assert!(!eq(&["$index"], "0.0.0.0/0").matches_record(&rec).unwrap());

    // Records without an index attribute never match.
    let plain = make_record("t", "2", "x");
    assert!(!eq(&["$index"], "10.1.2.3").matches_record(&plain).unwrap());

    // Unparseable query values never match.
    assert!(!eq(&["$index"], "not-an-ip").matches_record(&rec).unwrap());
}

#[test]
fn sync_latest_applies_index_filters() {
    let store = common::new_store();
    store
        .put(
            None,
            &[
                record_with_cidr("route", "r1", "10.0.0.0/8"),
                record_with_cidr("route", "r2", "192.168.0.0/16"),
            ],
        )
        .unwrap();

    let filter = struct_of(vec![("$index", string_value("10.1.2.3"))]);
    let expr = FilterExpression::from_struct(&filter).unwrap();
    let (_, _, records) = store.sync_latest("route", Some(&expr)).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "r1");
}
