// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Transaction error types.

use crate::store::StoreError;

/// Errors that can occur in transaction operations.
#[derive(Debug, thiserror::Error)]
pub enum TxnError {
    /// The backing store rejected an operation. A wrapped
    /// [`StoreError::Conflict`](crate::store::StoreError) is retryable;
    /// bounds errors are caller mistakes.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
