// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Versioned ordered key-value storage.
//!
//! Entries carry a monotonic version stamp shared by every entry touched by
//! one write batch. Batches may carry optimistic `check` preconditions (a
//! failed check rejects the whole batch with nothing applied) and numeric
//! `sum`/`min`/`max` aggregation writes.
//!
//! # Example
//!
//! ```
//! use madrone::store::{BackingStore, Key, ListArgs, OrderedKvStore, Value, WriteBatch};
//!
//! # fn example() -> Result<(), madrone::store::StoreError> {
//! let store = OrderedKvStore::new();
//! let receipt = store.write(WriteBatch::new().set("counter", 0i64))?;
//!
//! // Conditional update against the observed version.
//! store.write(
//!     WriteBatch::new()
//!         .check("counter", Some(receipt.version))
//!         .sum("counter", 1.0),
//! )?;
//!
//! let entry = store.get(&Key::from("counter"))?.expect("written above");
//! assert_eq!(entry.value, Value::Number(1.0));
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod error;
mod memory;
mod types;

pub use error::StoreError;
pub use memory::OrderedKvStore;
pub use types::{
    AggregateOp, BackingStore, Check, Entry, Key, ListArgs, Value, Version, WriteBatch,
    WriteReceipt,
};
