// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lock scheduling and lock-based transactions.
//!
//! # Key Concepts
//!
//! ## FIFO lock scheduling
//!
//! The [`LockScheduler`] keeps one read/write lock per key, granting
//! requests in arrival order: many readers share a key, a writer holds it
//! alone, and a compatible request still waits behind earlier queued
//! incompatible ones so writers cannot starve. Waiting suspends the
//! requesting task; no thread blocks.
//!
//! ## Transactions
//!
//! A [`Transaction`] layers a read cache and a write buffer over a
//! [`BackingStore`](crate::store::BackingStore), locking keys as they are
//! touched and flushing the buffer as one checked batch at commit.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use madrone::store::{OrderedKvStore, Value};
//! use madrone::txn::{Transactor, TxnError};
//!
//! # async fn example() -> Result<(), TxnError> {
//! let transactor = Transactor::new(Arc::new(OrderedKvStore::new()));
//!
//! let mut txn = transactor.begin();
//! let balance = match txn.get("balance").await? {
//!     Some(Value::Number(n)) => n,
//!     _ => 0.0,
//! };
//! txn.set("balance", balance + 50.0).await;
//! txn.commit()?;
//! # Ok(())
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(example()).unwrap();
//! ```

mod error;
mod lock;
mod scheduler;
mod transaction;

pub use error::TxnError;
pub use lock::{LockMode, LockRequest};
pub use scheduler::{LockGuard, LockScheduler, LockSession};
pub use transaction::{Transaction, Transactor};
