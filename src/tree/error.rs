// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tree error types.

/// Errors that can occur in tree operations.
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// A node id was referenced that does not exist in the node table.
    ///
    /// This is an internal invariant violation and is never recovered from.
    #[error("broken tree: missing node {id:?}")]
    MissingNode { id: String },

    /// A branch had no valid descent index for a key, or held the wrong
    /// node kind. The leftmost separator of every branch must be the
    /// unbounded-below sentinel, so every key has a descent path.
    #[error("broken tree: corrupt branch structure at node {id:?}")]
    CorruptBranch { id: String },

    /// `min_size` must be at least 1 and no more than half of `max_size`.
    #[error("invalid tree config: min_size {min_size} incompatible with max_size {max_size}")]
    Config { min_size: usize, max_size: usize },
}
