// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Node-addressed balanced tree indexes.
//!
//! Both trees store their nodes in a flat table keyed by [`NodeId`] instead
//! of holding direct references, so a node's neighbors are reached through
//! the table. This indirection is what allows individual nodes to live
//! inside an external key-value backend later on.
//!
//! # Key Concepts
//!
//! ## Separator keys
//!
//! A branch entry pairs a separator with a child id; the separator is the
//! minimum key of the child's subtree, except for the leftmost child whose
//! separator is `None` (unbounded below). Lookups descend through the last
//! entry whose separator is at or before the key.
//!
//! ## Interval augmentation
//!
//! [`IntervalTree`] keys entries by `(min, max, disambiguator)` and keeps a
//! `range_max` bound on every node: the largest interval upper bound in the
//! subtree. Overlap queries skip any child whose covered range cannot
//! intersect the query interval.
//!
//! # Example
//!
//! ```
//! use madrone::tree::{OrderedTree, TreeConfig};
//!
//! # fn example() -> Result<(), madrone::tree::TreeError> {
//! let mut tree = OrderedTree::new(TreeConfig::new(2, 4)?);
//! for k in 0..20 {
//!     tree.set(k, k * 2)?;
//! }
//! assert_eq!(tree.get(&7)?, Some(&14));
//! tree.delete(&7)?;
//! assert_eq!(tree.get(&7)?, None);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

mod error;
mod interval;
mod node;
mod ordered;

pub use error::TreeError;
pub use interval::{Interval, IntervalKey, IntervalTree};
pub use node::{Node, NodeId, TreeConfig};
pub use ordered::OrderedTree;
