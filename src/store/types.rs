// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Store types and the backing-store trait.

use serde::{Deserialize, Serialize};

use super::error::StoreError;

/// A key in the ordered store, compared bytewise.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

impl Key {
    /// Creates a new key from bytes.
    #[inline]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Returns the key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns true if the key starts with `prefix`.
    #[inline]
    pub fn has_prefix(&self, prefix: &Key) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl From<&[u8]> for Key {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s.into_bytes())
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A value in the store.
///
/// Numeric values participate in server-side aggregation writes
/// (`sum`/`min`/`max`); everything else is opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the numeric payload, if this is a number.
    #[inline]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Monotonic write stamp. Every entry touched by one write batch carries
/// the same version; versions are globally comparable within a store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version(pub u64);

/// A versioned key-value entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub version: Version,
}

/// A version precondition in a write batch. `version: None` expects the
/// entry to be absent.
#[derive(Debug, Clone)]
pub struct Check {
    pub key: Key,
    pub version: Option<Version>,
}

/// Numeric read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    Sum,
    Min,
    Max,
}

impl AggregateOp {
    /// Combines an existing numeric value with the operand.
    #[inline]
    pub fn apply(self, existing: f64, operand: f64) -> f64 {
        match self {
            AggregateOp::Sum => existing + operand,
            AggregateOp::Min => existing.min(operand),
            AggregateOp::Max => existing.max(operand),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Aggregate {
    pub op: AggregateOp,
    pub key: Key,
    pub operand: f64,
}

/// A single atomic write batch.
///
/// All sub-operations apply atomically and share one new version stamp;
/// if any `check` fails, nothing is applied.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub(crate) checks: Vec<Check>,
    pub(crate) sets: Vec<(Key, Value)>,
    pub(crate) aggregates: Vec<Aggregate>,
    pub(crate) deletes: Vec<Key>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the key's current version to equal `version`
    /// (`None` = must be absent) for the batch to apply.
    pub fn check(mut self, key: impl Into<Key>, version: Option<Version>) -> Self {
        self.checks.push(Check {
            key: key.into(),
            version,
        });
        self
    }

    /// Inserts or replaces an entry.
    pub fn set(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.sets.push((key.into(), value.into()));
        self
    }

    /// Adds `operand` to the existing numeric value (absent = 0).
    pub fn sum(mut self, key: impl Into<Key>, operand: f64) -> Self {
        self.aggregates.push(Aggregate {
            op: AggregateOp::Sum,
            key: key.into(),
            operand,
        });
        self
    }

    /// Keeps the smaller of the existing numeric value and `operand`.
    pub fn min(mut self, key: impl Into<Key>, operand: f64) -> Self {
        self.aggregates.push(Aggregate {
            op: AggregateOp::Min,
            key: key.into(),
            operand,
        });
        self
    }

    /// Keeps the larger of the existing numeric value and `operand`.
    pub fn max(mut self, key: impl Into<Key>, operand: f64) -> Self {
        self.aggregates.push(Aggregate {
            op: AggregateOp::Max,
            key: key.into(),
            operand,
        });
        self
    }

    /// Removes an entry unconditionally.
    pub fn delete(mut self, key: impl Into<Key>) -> Self {
        self.deletes.push(key.into());
        self
    }

    /// Returns true if the batch carries no operations at all.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
            && self.sets.is_empty()
            && self.aggregates.is_empty()
            && self.deletes.is_empty()
    }
}

/// Outcome of a successful write batch.
///
/// `mismatches` lists keys where an aggregation hit a non-numeric existing
/// value and overwrote it; the same events are emitted as `tracing`
/// warnings, but the receipt makes them assertable.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    pub version: Version,
    pub mismatches: Vec<Key>,
}

/// Range-query arguments.
///
/// At most one of `gt`/`gte` and one of `lt`/`lte` may be set; `prefix`
/// expands to the half-open range covering exactly the prefixed keys and
/// cannot be combined with explicit bounds. `reverse` returns descending
/// order, and together with `limit` selects the *last* `limit` matches.
#[derive(Debug, Clone, Default)]
pub struct ListArgs {
    pub prefix: Option<Key>,
    pub gt: Option<Key>,
    pub gte: Option<Key>,
    pub lt: Option<Key>,
    pub lte: Option<Key>,
    pub limit: Option<usize>,
    pub reverse: bool,
}

impl ListArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(mut self, prefix: impl Into<Key>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn gt(mut self, key: impl Into<Key>) -> Self {
        self.gt = Some(key.into());
        self
    }

    pub fn gte(mut self, key: impl Into<Key>) -> Self {
        self.gte = Some(key.into());
        self
    }

    pub fn lt(mut self, key: impl Into<Key>) -> Self {
        self.lt = Some(key.into());
        self
    }

    pub fn lte(mut self, key: impl Into<Key>) -> Self {
        self.lte = Some(key.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// The ordered key-value contract consumed by the transaction layer.
///
/// Implemented by [`OrderedKvStore`](super::OrderedKvStore) and by any
/// external storage adapter; adapters must preserve bound validation and
/// version/conflict semantics.
pub trait BackingStore: Send + Sync {
    /// Exact-match lookup.
    fn get(&self, key: &Key) -> Result<Option<Entry>, StoreError>;

    /// Applies one atomic batch, returning its version stamp.
    fn write(&self, batch: WriteBatch) -> Result<WriteReceipt, StoreError>;

    /// Range query in key order.
    fn list(&self, args: &ListArgs) -> Result<Vec<Entry>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_is_bytewise() {
        assert!(Key::from("a") < Key::from("b"));
        assert!(Key::from("a") < Key::from("aa"));
        assert!(Key::from("a/1") < Key::from("a/2"));
    }

    #[test]
    fn test_key_prefix() {
        assert!(Key::from("user/1").has_prefix(&Key::from("user/")));
        assert!(!Key::from("item/1").has_prefix(&Key::from("user/")));
    }

    #[test]
    fn test_aggregate_ops() {
        assert_eq!(AggregateOp::Sum.apply(5.0, 3.0), 8.0);
        assert_eq!(AggregateOp::Min.apply(5.0, 3.0), 3.0);
        assert_eq!(AggregateOp::Max.apply(5.0, 3.0), 5.0);
    }

    #[test]
    fn test_batch_builder() {
        let batch = WriteBatch::new()
            .check("a", Some(Version(1)))
            .set("a", 2i64)
            .sum("n", 5.0)
            .delete("old");
        assert!(!batch.is_empty());
        assert_eq!(batch.checks.len(), 1);
        assert_eq!(batch.sets.len(), 1);
        assert_eq!(batch.aggregates.len(), 1);
        assert_eq!(batch.deletes.len(), 1);
    }
}
