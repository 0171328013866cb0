//! Filter expressions.
//!
//! A filter is a tree of equality tests joined by conjunction and
//! disjunction, parsed from a semi-structured query object. Object keys
//! beginning with `$` are operators (`$and`, `$or`, `$eq`); any other key
//! extends the match path. The tree normalizes to disjunctive normal form
//! so that semantically equivalent filters compare equal as strings.
//!
//! Evaluation supports the paths `type`, `id`, and `$index` (CIDR
//! membership over the record's `$index.cidr` attribute, see [`index`]);
//! any other path fails with an unsupported-filter error.

use prost_types::value::Kind;

use crate::core::error::{BrokerError, BrokerResult};
use crate::proto;

pub mod index;

/// A field equality test at a dotted path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EqualsExpression {
    pub path: Vec<String>,
    pub value: String,
}

impl EqualsExpression {
    /// Evaluate this test against a record.
    pub fn matches_record(&self, rec: &proto::Record) -> BrokerResult<bool> {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        match path.as_slice() {
            ["type"] => Ok(rec.r#type == self.value),
            ["id"] => Ok(rec.id == self.value),
            ["$index"] => {
                if let Ok(prefix) = self.value.parse::<ipnet::IpNet>() {
                    Ok(index::record_matches_ip_prefix(rec, prefix))
                } else if let Ok(addr) = self.value.parse::<std::net::IpAddr>() {
                    Ok(index::record_matches_ip_addr(rec, addr))
                } else {
                    Ok(false)
                }
            }
            _ => Err(BrokerError::unsupported_filter(&self.path)),
        }
    }
}

impl std::fmt::Display for EqualsExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}={}", self.path.join("."), self.value)
    }
}

/// A filter AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpression {
    Equals(EqualsExpression),
    And(Vec<FilterExpression>),
    Or(Vec<FilterExpression>),
}

impl FilterExpression {
    /// Parse a filter from a semi-structured query object.
    pub fn from_struct(s: &prost_types::Struct) -> BrokerResult<FilterExpression> {
        parse_struct(&[], s)
    }

    /// Evaluate this filter against a record.
    pub fn matches_record(&self, rec: &proto::Record) -> BrokerResult<bool> {
        match self {
            Self::Equals(eq) => eq.matches_record(rec),
            Self::And(children) => {
                for child in children {
                    if !child.matches_record(rec)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Or(children) => {
                for child in children {
                    if child.matches_record(rec)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Build a conjunction, collapsing a single child to itself.
fn and_of(mut children: Vec<FilterExpression>) -> FilterExpression {
    if children.len() == 1 {
        children.remove(0)
    } else {
        FilterExpression::And(children)
    }
}

/// Build a disjunction, collapsing a single child to itself.
fn or_of(mut children: Vec<FilterExpression>) -> FilterExpression {
    if children.len() == 1 {
        children.remove(0)
    } else {
        FilterExpression::Or(children)
    }
}

fn parse_struct(path: &[String], s: &prost_types::Struct) -> BrokerResult<FilterExpression> {
    let mut and = Vec::new();

    // prost Struct fields are a BTreeMap, so iteration order is already
    // lexicographic.
    for (field, value) in &s.fields {
        match field.as_str() {
            "$and" => {
                let Some(Kind::ListValue(list)) = &value.kind else {
                    return Err(BrokerError::invalid_argument("$and must be an array"));
                };
                let children = parse_list(path, &list.values)?;
                and.push(and_of(children));
            }
            "$or" => {
                let Some(Kind::ListValue(list)) = &value.kind else {
                    return Err(BrokerError::invalid_argument("$or must be an array"));
                };
                let children = parse_list(path, &list.values)?;
                and.push(or_of(children));
            }
            "$eq" => {
                and.push(parse_eq(path, value)?);
            }
            _ => {
                let mut child_path = path.to_vec();
                child_path.push(field.clone());
                and.push(parse_value(&child_path, value)?);
            }
        }
    }

    Ok(and_of(and))
}

fn parse_list(
    path: &[String],
    values: &[prost_types::Value],
) -> BrokerResult<Vec<FilterExpression>> {
    values.iter().map(|v| parse_value(path, v)).collect()
}

fn parse_value(path: &[String], value: &prost_types::Value) -> BrokerResult<FilterExpression> {
    match &value.kind {
        Some(Kind::ListValue(list)) => Ok(or_of(parse_list(path, &list.values)?)),
        Some(Kind::StructValue(s)) => parse_struct(path, s),
        _ => parse_eq(path, value),
    }
}

fn parse_eq(path: &[String], value: &prost_types::Value) -> BrokerResult<FilterExpression> {
    let coerced = match &value.kind {
        Some(Kind::BoolValue(b)) => b.to_string(),
        Some(Kind::NullValue(_)) | None => "<nil>".to_string(),
        Some(Kind::NumberValue(n)) => format_number(*n),
        Some(Kind::StringValue(s)) => s.clone(),
        Some(other) => {
            return Err(BrokerError::invalid_argument(format!(
                "unsupported value for equality: {other:?}"
            )))
        }
    };
    Ok(FilterExpression::Equals(EqualsExpression {
        path: path.to_vec(),
        value: coerced,
    }))
}

/// Canonical decimal representation: integral doubles print without a
/// fractional part.
fn format_number(n: f64) -> String {
    format!("{n}")
}

/// A filter in disjunctive normal form: a sorted set of sorted sets of
/// equality tests. An empty inner set is the trivial always-true
/// conjunct; an empty outer set matches nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnf(pub Vec<Vec<EqualsExpression>>);

impl Dnf {
    /// Evaluate: a record matches iff any conjunct fully matches.
    pub fn matches_record(&self, rec: &proto::Record) -> BrokerResult<bool> {
        'conjunct: for conjunct in &self.0 {
            for eq in conjunct {
                if !eq.matches_record(rec)? {
                    continue 'conjunct;
                }
            }
            return Ok(true);
        }
        Ok(false)
    }
}

impl std::fmt::Display for Dnf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, conjunct) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            f.write_str("(")?;
            for (j, eq) in conjunct.iter().enumerate() {
                if j > 0 {
                    f.write_str("&")?;
                }
                write!(f, "{eq}")?;
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Convert a filter into disjunctive normal form.
///
/// The result is canonical: inner and outer lists are sorted and
/// de-duplicated, so two semantically equivalent filters (differing only
/// in nesting and child order) render identical strings.
pub fn filter_to_dnf(filter: Option<&FilterExpression>) -> Dnf {
    fn to_dnf(filter: Option<&FilterExpression>) -> Vec<Vec<EqualsExpression>> {
        match filter {
            None => vec![Vec::new()],
            Some(FilterExpression::Equals(eq)) => vec![vec![eq.clone()]],
            Some(FilterExpression::Or(children)) => children
                .iter()
                .flat_map(|c| to_dnf(Some(c)))
                .collect(),
            Some(FilterExpression::And(children)) => {
                let mut acc: Vec<Vec<EqualsExpression>> = vec![Vec::new()];
                for child in children {
                    let child_dnf = to_dnf(Some(child));
                    let mut next = Vec::with_capacity(acc.len() * child_dnf.len());
                    for xs in &acc {
                        for ys in &child_dnf {
                            let mut combined = xs.clone();
                            combined.extend(ys.iter().cloned());
                            next.push(combined);
                        }
                    }
                    acc = next;
                }
                acc
            }
        }
    }

    let mut dnf = to_dnf(filter);
    for conjunct in &mut dnf {
        conjunct.sort();
        conjunct.dedup();
    }
    dnf.sort();
    dnf.dedup();
    Dnf(dnf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eq(key: &str, value: &str) -> FilterExpression {
        FilterExpression::Equals(EqualsExpression {
            path: vec![key.to_string()],
            value: value.to_string(),
        })
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(1.0), "1");
        assert_eq!(format_number(1.5), "1.5");
        assert_eq!(format_number(-2.0), "-2");
    }

    #[test]
    fn empty_struct_matches_everything() {
        let filter = FilterExpression::from_struct(&prost_types::Struct::default()).unwrap();
        let rec = proto::Record::new("t", "1", None);
        assert!(filter.matches_record(&rec).unwrap());
    }

    #[test]
    fn unsupported_path_errors() {
        let filter = eq("name", "x");
        let rec = proto::Record::new("t", "1", None);
        assert!(matches!(
            filter.matches_record(&rec),
            Err(BrokerError::UnsupportedFilter { .. })
        ));
    }

    #[test]
    fn dnf_of_none_is_trivially_true() {
        let dnf = filter_to_dnf(None);
        assert_eq!(dnf.to_string(), "()");
        let rec = proto::Record::new("t", "1", None);
        assert!(dnf.matches_record(&rec).unwrap());
    }

    #[test]
    fn dnf_distributes_and_over_or() {
        let filter = FilterExpression::And(vec![
            FilterExpression::Or(vec![eq("a", "1"), eq("a", "2")]),
            eq("b", "3"),
        ]);
        let dnf = filter_to_dnf(Some(&filter));
        assert_eq!(dnf.to_string(), "(a=1&b=3)|(a=2&b=3)");
    }
}
