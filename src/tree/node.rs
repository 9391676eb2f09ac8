// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared node model for the node-addressed trees.

use rand::distr::Alphanumeric;
use rand::Rng;

use super::error::TreeError;

/// Identifier of a node in a tree's node table.
///
/// Ids are compared only for identity, never for ordering. The id `"root"`
/// is reserved for the tree's entry point; all other ids are randomly
/// generated and collision-resistant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    /// The distinguished entry-point id.
    pub const ROOT: &'static str = "root";

    /// Returns the root node id.
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Generates a fresh random node id.
    pub fn generate() -> Self {
        let id: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(16)
            .map(char::from)
            .collect();
        Self(id)
    }

    /// Returns true if this is the root id.
    #[inline]
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A node in an [`OrderedTree`](super::OrderedTree).
///
/// A leaf holds `(key, value)` entries sorted by key. A branch holds
/// `(separator, child)` entries sorted by separator, where `None` denotes
/// unbounded-below and is always and only the first entry.
#[derive(Debug, Clone)]
pub enum Node<K, V> {
    Leaf { entries: Vec<(K, V)> },
    Branch { entries: Vec<(Option<K>, NodeId)> },
}

impl<K, V> Node<K, V> {
    /// Number of entries in the node.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Branch { entries } => entries.len(),
        }
    }

    /// Returns true if the node has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is a leaf node.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

/// Size bounds for tree nodes.
///
/// Non-root nodes hold between `min_size` and `max_size` entries inclusive;
/// the root is exempt from the minimum.
#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub min_size: usize,
    pub max_size: usize,
}

impl TreeConfig {
    /// Creates a config, validating `1 <= min_size <= max_size / 2`.
    ///
    /// The upper bound on `min_size` guarantees that a split always
    /// produces two nodes meeting the minimum, and that a merge of two
    /// minimum-sized nodes fits within the maximum.
    pub fn new(min_size: usize, max_size: usize) -> Result<Self, TreeError> {
        if min_size == 0 || min_size > max_size / 2 {
            return Err(TreeError::Config { min_size, max_size });
        }
        Ok(Self { min_size, max_size })
    }
}

/// Finds the descent index for `key` among branch entries: the last entry
/// whose separator is at or before the key, with `None` sorting first.
///
/// An empty result set (index 0 with nothing at or before) means the branch
/// is missing its unbounded-below first entry, which is corruption.
pub(crate) fn child_index<K: Ord>(
    entries: &[(Option<K>, NodeId)],
    key: &K,
    id: &NodeId,
) -> Result<usize, TreeError> {
    let idx = entries.partition_point(|(sep, _)| match sep {
        None => true,
        Some(s) => s <= key,
    });
    if idx == 0 {
        return Err(TreeError::CorruptBranch { id: id.0.clone() });
    }
    Ok(idx - 1)
}

/// Finds the insert position for a new separator among branch entries.
pub(crate) fn separator_position<K: Ord>(entries: &[(Option<K>, NodeId)], key: &K) -> usize {
    entries.partition_point(|(sep, _)| match sep {
        None => true,
        Some(s) => s <= key,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_unique() {
        let a = NodeId::generate();
        let b = NodeId::generate();
        assert_ne!(a, b);
        assert!(!a.is_root());
    }

    #[test]
    fn test_config_validation() {
        assert!(TreeConfig::new(1, 2).is_ok());
        assert!(TreeConfig::new(2, 4).is_ok());
        assert!(TreeConfig::new(2, 5).is_ok());
        assert!(matches!(
            TreeConfig::new(3, 4),
            Err(TreeError::Config { .. })
        ));
        assert!(matches!(
            TreeConfig::new(0, 4),
            Err(TreeError::Config { .. })
        ));
    }

    #[test]
    fn test_child_index_requires_unbounded_first_entry() {
        let entries = vec![
            (Some(10), NodeId::generate()),
            (Some(20), NodeId::generate()),
        ];
        assert!(matches!(
            child_index(&entries, &5, &NodeId::root()),
            Err(TreeError::CorruptBranch { .. })
        ));

        let entries = vec![(None, NodeId::generate()), (Some(10), NodeId::generate())];
        assert_eq!(child_index(&entries, &5, &NodeId::root()).unwrap(), 0);
        assert_eq!(child_index(&entries, &10, &NodeId::root()).unwrap(), 1);
        assert_eq!(child_index(&entries, &15, &NodeId::root()).unwrap(), 1);
    }
}
