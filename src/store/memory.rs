// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! In-memory ordered key-value store with versioned entries.

use std::ops::Bound;

use parking_lot::RwLock;
use tracing::warn;

use super::error::StoreError;
use super::types::{
    BackingStore, Entry, Key, ListArgs, Value, Version, WriteBatch, WriteReceipt,
};

/// Returns the smallest key strictly greater than every key with the given
/// prefix, or `None` when the prefix is all `0xFF` (unbounded above).
fn prefix_upper_bound(prefix: &Key) -> Option<Key> {
    let mut bytes = prefix.0.clone();
    while let Some(last) = bytes.last_mut() {
        if *last == 0xFF {
            bytes.pop();
        } else {
            *last += 1;
            return Some(Key(bytes));
        }
    }
    None
}

fn resolve_bounds(args: &ListArgs) -> Result<(Bound<Key>, Bound<Key>), StoreError> {
    if args.gt.is_some() && args.gte.is_some() {
        return Err(StoreError::Bounds("both gt and gte set".to_string()));
    }
    if args.lt.is_some() && args.lte.is_some() {
        return Err(StoreError::Bounds("both lt and lte set".to_string()));
    }
    if args.prefix.is_some()
        && (args.gt.is_some() || args.gte.is_some() || args.lt.is_some() || args.lte.is_some())
    {
        return Err(StoreError::Bounds(
            "prefix cannot be combined with explicit bounds".to_string(),
        ));
    }

    let (lower, upper) = if let Some(prefix) = &args.prefix {
        let upper = match prefix_upper_bound(prefix) {
            Some(k) => Bound::Excluded(k),
            None => Bound::Unbounded,
        };
        (Bound::Included(prefix.clone()), upper)
    } else {
        let lower = match (&args.gt, &args.gte) {
            (Some(k), None) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            _ => Bound::Unbounded,
        };
        let upper = match (&args.lt, &args.lte) {
            (Some(k), None) => Bound::Excluded(k.clone()),
            (None, Some(k)) => Bound::Included(k.clone()),
            _ => Bound::Unbounded,
        };
        (lower, upper)
    };

    if let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) =
        (&lower, &upper)
    {
        if lo > hi {
            return Err(StoreError::Bounds(format!(
                "start {lo:?} is after end {hi:?}"
            )));
        }
    }
    Ok((lower, upper))
}

#[derive(Debug, Default)]
struct Inner {
    /// Sorted by key, unique by key.
    entries: Vec<Entry>,
    next_version: u64,
}

impl Inner {
    fn position(&self, key: &Key) -> Result<usize, usize> {
        self.entries.binary_search_by(|e| e.key.cmp(key))
    }

    fn upsert(&mut self, key: Key, value: Value, version: Version) {
        match self.position(&key) {
            Ok(i) => {
                self.entries[i].value = value;
                self.entries[i].version = version;
            }
            Err(i) => self.entries.insert(
                i,
                Entry {
                    key,
                    value,
                    version,
                },
            ),
        }
    }

    fn remove(&mut self, key: &Key) {
        if let Ok(i) = self.position(key) {
            self.entries.remove(i);
        }
    }
}

/// Sorted sequence of versioned entries with optimistic-concurrency checks
/// and server-side numeric aggregation.
///
/// Interior locking makes the handle shareable (`&self` methods), but the
/// store performs no cross-operation coordination; that is the transaction
/// layer's job.
#[derive(Debug, Default)]
pub struct OrderedKvStore {
    inner: RwLock<Inner>,
}

impl OrderedKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    /// Returns true if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

impl BackingStore for OrderedKvStore {
    fn get(&self, key: &Key) -> Result<Option<Entry>, StoreError> {
        let inner = self.inner.read();
        Ok(inner.position(key).ok().map(|i| inner.entries[i].clone()))
    }

    fn write(&self, batch: WriteBatch) -> Result<WriteReceipt, StoreError> {
        let mut inner = self.inner.write();

        // Preconditions run before any mutation so a conflict rejects the
        // batch with the store untouched.
        for check in &batch.checks {
            let current = inner.position(&check.key).ok().map(|i| inner.entries[i].version);
            if current != check.version {
                return Err(StoreError::Conflict {
                    key: check.key.clone(),
                });
            }
        }

        let version = Version(inner.next_version);
        inner.next_version += 1;
        let mut mismatches = Vec::new();

        for (key, value) in batch.sets {
            inner.upsert(key, value, version);
        }
        for agg in batch.aggregates {
            let existing = inner
                .position(&agg.key)
                .ok()
                .map(|i| inner.entries[i].value.clone());
            let next = match existing {
                Some(Value::Number(n)) => agg.op.apply(n, agg.operand),
                Some(other) => {
                    // Non-numeric target: overwrite rather than fail, but
                    // surface the mismatch.
                    warn!(
                        key = ?agg.key,
                        existing = ?other,
                        op = ?agg.op,
                        "aggregation target is not numeric; overwriting"
                    );
                    mismatches.push(agg.key.clone());
                    agg.operand
                }
                // Absent acts as the identity: the operand stands alone.
                None => agg.operand,
            };
            inner.upsert(agg.key, Value::Number(next), version);
        }
        for key in batch.deletes {
            inner.remove(&key);
        }

        Ok(WriteReceipt {
            version,
            mismatches,
        })
    }

    fn list(&self, args: &ListArgs) -> Result<Vec<Entry>, StoreError> {
        let (lower, upper) = resolve_bounds(args)?;
        let inner = self.inner.read();
        let entries = &inner.entries;

        let lo = match &lower {
            Bound::Unbounded => 0,
            Bound::Included(k) => entries.partition_point(|e| e.key < *k),
            Bound::Excluded(k) => entries.partition_point(|e| e.key <= *k),
        };
        let hi = match &upper {
            Bound::Unbounded => entries.len(),
            Bound::Included(k) => entries.partition_point(|e| e.key <= *k),
            Bound::Excluded(k) => entries.partition_point(|e| e.key < *k),
        };
        let matched = &entries[lo..hi.max(lo)];

        let out = match (args.reverse, args.limit) {
            // Reverse with a limit selects the last `limit` matches in
            // descending order, not the first `limit` reversed.
            (true, Some(n)) => matched.iter().rev().take(n).cloned().collect(),
            (true, None) => matched.iter().rev().cloned().collect(),
            (false, Some(n)) => matched.iter().take(n).cloned().collect(),
            (false, None) => matched.to_vec(),
        };
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(entries: &[Entry]) -> Vec<&str> {
        entries
            .iter()
            .map(|e| std::str::from_utf8(e.key.as_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn test_get_set_version() {
        let store = OrderedKvStore::new();
        let r1 = store.write(WriteBatch::new().set("a", 1i64)).unwrap();
        let r2 = store
            .write(WriteBatch::new().set("b", 2i64).set("c", 3i64))
            .unwrap();
        assert!(r2.version > r1.version);

        let a = store.get(&Key::from("a")).unwrap().unwrap();
        assert_eq!(a.value, Value::Number(1.0));
        assert_eq!(a.version, r1.version);

        // Entries touched by one batch share its stamp.
        let b = store.get(&Key::from("b")).unwrap().unwrap();
        let c = store.get(&Key::from("c")).unwrap().unwrap();
        assert_eq!(b.version, r2.version);
        assert_eq!(c.version, r2.version);
    }

    #[test]
    fn test_check_conflict_rejects_whole_batch() {
        let store = OrderedKvStore::new();
        let r = store.write(WriteBatch::new().set("a", 1i64)).unwrap();

        // Stale expected version.
        let err = store
            .write(
                WriteBatch::new()
                    .check("a", Some(Version(r.version.0 + 10)))
                    .set("a", 2i64)
                    .set("b", 9i64),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));

        // Nothing was applied.
        let a = store.get(&Key::from("a")).unwrap().unwrap();
        assert_eq!(a.value, Value::Number(1.0));
        assert!(store.get(&Key::from("b")).unwrap().is_none());

        // Matching version applies.
        store
            .write(
                WriteBatch::new()
                    .check("a", Some(r.version))
                    .set("a", 2i64),
            )
            .unwrap();
        let a = store.get(&Key::from("a")).unwrap().unwrap();
        assert_eq!(a.value, Value::Number(2.0));
    }

    #[test]
    fn test_check_absent_semantics() {
        let store = OrderedKvStore::new();
        // Expecting absence of a missing key passes.
        store
            .write(WriteBatch::new().check("a", None).set("a", 1i64))
            .unwrap();
        // Now the key exists, so expecting absence conflicts.
        let err = store
            .write(WriteBatch::new().check("a", None).set("a", 2i64))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        // And expecting a version on a missing key conflicts too.
        let err = store
            .write(WriteBatch::new().check("missing", Some(Version(0))))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
    }

    #[test]
    fn test_sum_from_absent_twice() {
        let store = OrderedKvStore::new();
        store.write(WriteBatch::new().sum("n", 5.0)).unwrap();
        store.write(WriteBatch::new().sum("n", 5.0)).unwrap();
        let n = store.get(&Key::from("n")).unwrap().unwrap();
        assert_eq!(n.value, Value::Number(10.0));
    }

    #[test]
    fn test_min_max_aggregation() {
        let store = OrderedKvStore::new();
        store.write(WriteBatch::new().min("lo", 5.0).max("hi", 5.0)).unwrap();
        store.write(WriteBatch::new().min("lo", 9.0).max("hi", 9.0)).unwrap();
        store.write(WriteBatch::new().min("lo", 2.0).max("hi", 2.0)).unwrap();
        assert_eq!(
            store.get(&Key::from("lo")).unwrap().unwrap().value,
            Value::Number(2.0)
        );
        assert_eq!(
            store.get(&Key::from("hi")).unwrap().unwrap().value,
            Value::Number(9.0)
        );
    }

    #[test]
    fn test_aggregation_type_mismatch_overwrites() {
        let store = OrderedKvStore::new();
        store
            .write(WriteBatch::new().set("n", "not a number"))
            .unwrap();
        let receipt = store.write(WriteBatch::new().sum("n", 7.0)).unwrap();
        assert_eq!(receipt.mismatches, vec![Key::from("n")]);
        assert_eq!(
            store.get(&Key::from("n")).unwrap().unwrap().value,
            Value::Number(7.0)
        );
        // Follow-up aggregation is clean.
        let receipt = store.write(WriteBatch::new().sum("n", 3.0)).unwrap();
        assert!(receipt.mismatches.is_empty());
        assert_eq!(
            store.get(&Key::from("n")).unwrap().unwrap().value,
            Value::Number(10.0)
        );
    }

    #[test]
    fn test_delete_unconditional() {
        let store = OrderedKvStore::new();
        store.write(WriteBatch::new().set("a", 1i64)).unwrap();
        store.write(WriteBatch::new().delete("a").delete("ghost")).unwrap();
        assert!(store.get(&Key::from("a")).unwrap().is_none());
        assert!(store.is_empty());
    }

    fn seeded() -> OrderedKvStore {
        let store = OrderedKvStore::new();
        store
            .write(
                WriteBatch::new()
                    .set("user/1", 1i64)
                    .set("user/2", 2i64)
                    .set("user/3", 3i64)
                    .set("item/1", 10i64)
                    .set("zeta", 99i64),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_list_prefix() {
        let store = seeded();
        let out = store.list(&ListArgs::new().prefix("user/")).unwrap();
        assert_eq!(keys(&out), vec!["user/1", "user/2", "user/3"]);
    }

    #[test]
    fn test_list_explicit_bounds() {
        let store = seeded();
        let out = store
            .list(&ListArgs::new().gte("user/1").lt("user/3"))
            .unwrap();
        assert_eq!(keys(&out), vec!["user/1", "user/2"]);

        let out = store
            .list(&ListArgs::new().gt("user/1").lte("user/3"))
            .unwrap();
        assert_eq!(keys(&out), vec!["user/2", "user/3"]);

        let out = store.list(&ListArgs::new()).unwrap();
        assert_eq!(out.len(), 5);
    }

    #[test]
    fn test_list_reverse_with_limit_takes_last() {
        let store = seeded();
        let out = store
            .list(&ListArgs::new().prefix("user/").reverse().limit(2))
            .unwrap();
        assert_eq!(keys(&out), vec!["user/3", "user/2"]);

        let out = store.list(&ListArgs::new().prefix("user/").limit(2)).unwrap();
        assert_eq!(keys(&out), vec!["user/1", "user/2"]);
    }

    #[test]
    fn test_list_bounds_errors() {
        let store = seeded();
        let err = store
            .list(&ListArgs::new().gt("a").gte("b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Bounds(_)));

        let err = store
            .list(&ListArgs::new().lt("a").lte("b"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Bounds(_)));

        let err = store
            .list(&ListArgs::new().gte("z").lt("a"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Bounds(_)));

        let err = store
            .list(&ListArgs::new().prefix("user/").lt("zzz"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Bounds(_)));
    }

    #[test]
    fn test_prefix_upper_bound_carry() {
        assert_eq!(
            prefix_upper_bound(&Key::new(vec![1, 2, 3])),
            Some(Key::new(vec![1, 2, 4]))
        );
        assert_eq!(
            prefix_upper_bound(&Key::new(vec![1, 0xFF, 0xFF])),
            Some(Key::new(vec![2]))
        );
        assert_eq!(prefix_upper_bound(&Key::new(vec![0xFF, 0xFF])), None);
    }
}
