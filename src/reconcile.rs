//! Sorted-collection reconciliation.
//!
//! [`RecordSet`] stores records ordered by `(type, id)`. [`reconcile`]
//! diffs an observed set against a desired set and yields the minimal
//! stream of creations, deletions, and payload changes whose application
//! to the observed set produces the desired one.

use std::collections::BTreeMap;

use crate::proto;

/// A collection of records ordered by `(type, id)`.
#[derive(Debug, Default, Clone)]
pub struct RecordSet {
    records: BTreeMap<(String, String), proto::Record>,
}

impl RecordSet {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply updates. A record with `deleted_at` set is removed; any
    /// other record replaces the entry for its `(type, id)`.
    pub fn update(&mut self, records: impl IntoIterator<Item = proto::Record>) {
        for rec in records {
            let key = (rec.r#type.clone(), rec.id.clone());
            if rec.is_deleted() {
                self.records.remove(&key);
            } else {
                self.records.insert(key, rec);
            }
        }
    }

    /// Iterate all records in `(type, id)` order.
    pub fn iter(&self) -> impl Iterator<Item = &proto::Record> {
        self.records.values()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl FromIterator<proto::Record> for RecordSet {
    fn from_iter<T: IntoIterator<Item = proto::Record>>(iter: T) -> Self {
        let mut set = Self::new();
        set.update(iter);
        set
    }
}

/// A single observed-to-desired difference. A creation has no `before`;
/// a deletion has no `after`; a payload change has both.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub before: Option<proto::Record>,
    pub after: Option<proto::Record>,
}

/// Diff two collections into a lazy change stream, in `(type, id)` order.
///
/// Records present in both with byte-equal data payloads yield nothing.
/// The borrows keep both collections immutable for the iterator's
/// lifetime.
pub fn reconcile<'a>(
    original: &'a RecordSet,
    desired: &'a RecordSet,
) -> impl Iterator<Item = RecordChange> + 'a {
    let mut original_iter = original.iter().peekable();
    let mut desired_iter = desired.iter().peekable();

    std::iter::from_fn(move || loop {
        match (original_iter.peek(), desired_iter.peek()) {
            (None, None) => return None,
            (Some(_), None) => {
                let before = original_iter.next().cloned();
                return Some(RecordChange {
                    before,
                    after: None,
                });
            }
            (None, Some(_)) => {
                let after = desired_iter.next().cloned();
                return Some(RecordChange {
                    before: None,
                    after,
                });
            }
            (Some(orig), Some(des)) => {
                match proto::compare_records_by_type_and_id(orig, des) {
                    std::cmp::Ordering::Less => {
                        let before = original_iter.next().cloned();
                        return Some(RecordChange {
                            before,
                            after: None,
                        });
                    }
                    std::cmp::Ordering::Greater => {
                        let after = desired_iter.next().cloned();
                        return Some(RecordChange {
                            before: None,
                            after,
                        });
                    }
                    std::cmp::Ordering::Equal => {
                        let before = original_iter.next().cloned();
                        let after = desired_iter.next().cloned();
                        if before.as_ref().and_then(|r| r.data.as_ref())
                            != after.as_ref().and_then(|r| r.data.as_ref())
                        {
                            return Some(RecordChange { before, after });
                        }
                        // Unchanged; keep walking.
                    }
                }
            }
        }
    })
}
