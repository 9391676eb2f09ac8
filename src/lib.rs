// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Madrone: embeddable ordered-storage building blocks.
//!
//! Three layers, each usable on its own:
//!
//! - [`tree`]: node-addressed B+Tree variants ([`tree::OrderedTree`] for
//!   ordered keys, [`tree::IntervalTree`] for interval overlap queries).
//! - [`store`]: a versioned ordered key-value store with batched
//!   conditional writes and numeric aggregation.
//! - [`txn`]: a FIFO per-key lock scheduler and lock-based transactions
//!   over any [`store::BackingStore`].

pub mod store;
pub mod tree;
pub mod txn;

pub use store::{
    AggregateOp, BackingStore, Check, Entry, Key, ListArgs, OrderedKvStore, StoreError, Value,
    Version, WriteBatch, WriteReceipt,
};
pub use tree::{Interval, IntervalKey, IntervalTree, NodeId, OrderedTree, TreeConfig, TreeError};
pub use txn::{
    LockGuard, LockMode, LockRequest, LockScheduler, LockSession, Transaction, Transactor,
    TxnError,
};
