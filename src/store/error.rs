// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Store error types.

use super::types::Key;

/// Errors that can occur in store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `check` precondition did not match the current stored version.
    /// The whole batch is rejected; callers retry with fresh reads.
    #[error("version conflict at key {key:?}")]
    Conflict { key: Key },

    /// Invalid range arguments on a list query. Caller mistake; raised
    /// loudly rather than returning partial data.
    #[error("invalid bounds: {0}")]
    Bounds(String),
}
