// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Order-preserving balanced tree addressed by node ids.
//!
//! Nodes live in a flat table keyed by [`NodeId`] rather than pointing at
//! each other directly, so individual nodes can later be persisted through
//! any key-value backend. The id `"root"` is the entry point once any entry
//! has been inserted.

use std::collections::HashMap;

use tracing::debug;

use super::error::TreeError;
use super::node::{child_index, separator_position, Node, NodeId, TreeConfig};

/// A balanced ordered index over a totally ordered key space.
///
/// Mutation is not internally synchronized; callers must serialize
/// structural changes to a given tree.
#[derive(Debug)]
pub struct OrderedTree<K, V> {
    config: TreeConfig,
    nodes: HashMap<NodeId, Node<K, V>>,
}

impl<K: Ord + Clone, V> OrderedTree<K, V> {
    /// Creates an empty tree with the given size bounds.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
        }
    }

    fn node(&self, id: &NodeId) -> Result<&Node<K, V>, TreeError> {
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::MissingNode { id: id.0.clone() })
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut Node<K, V>, TreeError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::MissingNode { id: id.0.clone() })
    }

    fn leaf_entries_mut(&mut self, id: &NodeId) -> Result<&mut Vec<(K, V)>, TreeError> {
        match self.node_mut(id)? {
            Node::Leaf { entries } => Ok(entries),
            Node::Branch { .. } => Err(TreeError::CorruptBranch { id: id.0.clone() }),
        }
    }

    fn branch_entries(&self, id: &NodeId) -> Result<&Vec<(Option<K>, NodeId)>, TreeError> {
        match self.node(id)? {
            Node::Branch { entries } => Ok(entries),
            Node::Leaf { .. } => Err(TreeError::CorruptBranch { id: id.0.clone() }),
        }
    }

    fn branch_entries_mut(
        &mut self,
        id: &NodeId,
    ) -> Result<&mut Vec<(Option<K>, NodeId)>, TreeError> {
        match self.node_mut(id)? {
            Node::Branch { entries } => Ok(entries),
            Node::Leaf { .. } => Err(TreeError::CorruptBranch { id: id.0.clone() }),
        }
    }

    /// Looks up the value stored for `key`.
    pub fn get(&self, key: &K) -> Result<Option<&V>, TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            return Ok(None);
        }
        let mut current = NodeId::root();
        loop {
            match self.node(&current)? {
                Node::Leaf { entries } => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| k.cmp(key))
                        .ok()
                        .and_then(|i| entries.get(i))
                        .map(|(_, v)| v));
                }
                Node::Branch { entries } => {
                    let idx = child_index(entries, key, &current)?;
                    current = entries[idx].1.clone();
                }
            }
        }
    }

    /// Inserts or replaces the value for `key`.
    ///
    /// Replacement never triggers rebalancing; insertion splits oversized
    /// nodes upward until every node on the path is within bounds.
    pub fn set(&mut self, key: K, value: V) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            self.nodes.insert(
                NodeId::root(),
                Node::Leaf {
                    entries: vec![(key, value)],
                },
            );
            return Ok(());
        }
        let mut ancestors: Vec<NodeId> = Vec::new();
        let mut current = NodeId::root();
        loop {
            match self.node(&current)? {
                Node::Leaf { .. } => break,
                Node::Branch { entries } => {
                    let idx = child_index(entries, &key, &current)?;
                    let child = entries[idx].1.clone();
                    ancestors.push(current);
                    current = child;
                }
            }
        }
        let entries = self.leaf_entries_mut(&current)?;
        match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
            Ok(i) => {
                entries[i].1 = value;
                return Ok(());
            }
            Err(i) => entries.insert(i, (key, value)),
        }
        self.split_upward(current, ancestors)
    }

    fn split_upward(
        &mut self,
        mut current: NodeId,
        mut ancestors: Vec<NodeId>,
    ) -> Result<(), TreeError> {
        loop {
            if self.node(&current)?.len() <= self.config.max_size {
                return Ok(());
            }
            let right_id = NodeId::generate();
            let (right_node, right_min) = match self.node_mut(&current)? {
                Node::Leaf { entries } => {
                    let mid = entries.len().div_ceil(2);
                    let right = entries.split_off(mid);
                    let right_min = match right.first() {
                        Some((k, _)) => k.clone(),
                        None => {
                            return Err(TreeError::CorruptBranch {
                                id: current.0.clone(),
                            })
                        }
                    };
                    (Node::Leaf { entries: right }, right_min)
                }
                Node::Branch { entries } => {
                    let mid = entries.len().div_ceil(2);
                    let mut right = entries.split_off(mid);
                    // The separator at the split point moves up to the
                    // parent; the right node's first child becomes its
                    // unbounded-below entry.
                    let right_min = match right.first_mut().and_then(|(sep, _)| sep.take()) {
                        Some(k) => k,
                        None => {
                            return Err(TreeError::CorruptBranch {
                                id: current.0.clone(),
                            })
                        }
                    };
                    (Node::Branch { entries: right }, right_min)
                }
            };
            debug!(node = %current, right = %right_id, "split oversized node");
            self.nodes.insert(right_id.clone(), right_node);

            if current.is_root() {
                // Re-root: the old root's remaining entries move to a fresh
                // id and a new two-child root takes its place.
                let left_id = NodeId::generate();
                let old_root = self.nodes.remove(&NodeId::root()).ok_or_else(|| {
                    TreeError::MissingNode {
                        id: NodeId::ROOT.to_string(),
                    }
                })?;
                self.nodes.insert(left_id.clone(), old_root);
                self.nodes.insert(
                    NodeId::root(),
                    Node::Branch {
                        entries: vec![(None, left_id), (Some(right_min), right_id)],
                    },
                );
                return Ok(());
            }

            let parent = ancestors.pop().ok_or_else(|| TreeError::MissingNode {
                id: current.0.clone(),
            })?;
            let entries = self.branch_entries_mut(&parent)?;
            let pos = separator_position(entries, &right_min);
            entries.insert(pos, (Some(right_min), right_id));
            current = parent;
        }
    }

    /// Removes `key` if present. Absent keys and the empty tree are no-ops.
    pub fn delete(&mut self, key: &K) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            return Ok(());
        }
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut current = NodeId::root();
        loop {
            match self.node(&current)? {
                Node::Leaf { .. } => break,
                Node::Branch { entries } => {
                    let idx = child_index(entries, key, &current)?;
                    let child = entries[idx].1.clone();
                    path.push((current, idx));
                    current = child;
                }
            }
        }
        let min_changed;
        {
            let entries = self.leaf_entries_mut(&current)?;
            let Ok(i) = entries.binary_search_by(|(k, _)| k.cmp(key)) else {
                return Ok(());
            };
            entries.remove(i);
            min_changed = if i == 0 {
                entries.first().map(|(k, _)| k.clone())
            } else {
                None
            };
        }
        self.rebalance_upward(current, path, min_changed)
    }

    fn rebalance_upward(
        &mut self,
        mut current: NodeId,
        mut path: Vec<(NodeId, usize)>,
        mut pending_min: Option<K>,
    ) -> Result<(), TreeError> {
        loop {
            if current.is_root() {
                return self.collapse_root();
            }
            let (parent, idx) = match path.pop() {
                Some(level) => level,
                None => {
                    return Err(TreeError::MissingNode {
                        id: current.0.clone(),
                    })
                }
            };
            if self.node(&current)?.len() >= self.config.min_size {
                // Well-sized: at most the parent's separator needs a
                // refresh. The leftmost child has the unbounded sentinel,
                // so a changed minimum there leaves ancestors stale-low,
                // which is harmless under greatest-at-or-before routing.
                let Some(new_min) = pending_min.take() else {
                    return Ok(());
                };
                if idx == 0 {
                    return Ok(());
                }
                let entries = self.branch_entries_mut(&parent)?;
                let slot = entries.get_mut(idx).ok_or_else(|| TreeError::CorruptBranch {
                    id: parent.0.clone(),
                })?;
                if slot.0.as_ref() == Some(&new_min) {
                    return Ok(());
                }
                slot.0 = Some(new_min);
                current = parent;
                continue;
            }
            self.merge_or_redistribute(&current, &parent, idx)?;
            pending_min = None;
            current = parent;
        }
    }

    fn collapse_root(&mut self) -> Result<(), TreeError> {
        loop {
            match self.node(&NodeId::root())? {
                Node::Leaf { entries } => {
                    if entries.is_empty() {
                        self.nodes.remove(&NodeId::root());
                    }
                    return Ok(());
                }
                Node::Branch { entries } => {
                    if entries.len() != 1 {
                        return Ok(());
                    }
                    // Single-child root: pull the child's contents up.
                    let child_id = entries[0].1.clone();
                    let child =
                        self.nodes
                            .remove(&child_id)
                            .ok_or_else(|| TreeError::MissingNode {
                                id: child_id.0.clone(),
                            })?;
                    self.nodes.insert(NodeId::root(), child);
                }
            }
        }
    }

    /// Merges or redistributes an undersized non-root node with a sibling.
    ///
    /// The right sibling is used when the node is its parent's first child,
    /// otherwise the left sibling.
    fn merge_or_redistribute(
        &mut self,
        node_id: &NodeId,
        parent_id: &NodeId,
        idx: usize,
    ) -> Result<(), TreeError> {
        let from_right = idx == 0;
        let sibling_idx = if from_right { 1 } else { idx - 1 };
        let (sibling_id, node_sep, sibling_sep) = {
            let entries = self.branch_entries(parent_id)?;
            let sibling = entries
                .get(sibling_idx)
                .ok_or_else(|| TreeError::CorruptBranch {
                    id: parent_id.0.clone(),
                })?;
            let own = entries.get(idx).ok_or_else(|| TreeError::CorruptBranch {
                id: parent_id.0.clone(),
            })?;
            (sibling.1.clone(), own.0.clone(), sibling.0.clone())
        };
        let mut node = self
            .nodes
            .remove(node_id)
            .ok_or_else(|| TreeError::MissingNode {
                id: node_id.0.clone(),
            })?;
        let combined = node.len() + self.node(&sibling_id)?.len();

        if combined > self.config.max_size {
            let target = combined.div_ceil(2);
            let move_count = target - node.len();
            debug!(node = %node_id, sibling = %sibling_id, move_count, "redistributing entries");
            let new_sep = match (self.node_mut(&sibling_id)?, &mut node) {
                (Node::Leaf { entries: sibling }, Node::Leaf { entries: own }) => {
                    if from_right {
                        own.extend(sibling.drain(0..move_count));
                        sibling.first().map(|(k, _)| k.clone())
                    } else {
                        let moved = sibling.split_off(sibling.len() - move_count);
                        own.splice(0..0, moved);
                        own.first().map(|(k, _)| k.clone())
                    }
                }
                (Node::Branch { entries: sibling }, Node::Branch { entries: own }) => {
                    if from_right {
                        // Materialize the right sibling's real lower bound
                        // before handing over its head entries.
                        if let Some(first) = sibling.first_mut() {
                            first.0 = sibling_sep.clone();
                        }
                        own.extend(sibling.drain(0..move_count));
                        sibling.first_mut().and_then(|(sep, _)| sep.take())
                    } else {
                        if let Some(first) = own.first_mut() {
                            first.0 = node_sep.clone();
                        }
                        let mut moved = sibling.split_off(sibling.len() - move_count);
                        let sep = moved.first_mut().and_then(|(sep, _)| sep.take());
                        own.splice(0..0, moved);
                        sep
                    }
                }
                _ => {
                    return Err(TreeError::CorruptBranch {
                        id: parent_id.0.clone(),
                    })
                }
            };
            let Some(new_sep) = new_sep else {
                return Err(TreeError::CorruptBranch {
                    id: parent_id.0.clone(),
                });
            };
            self.nodes.insert(node_id.clone(), node);
            let entries = self.branch_entries_mut(parent_id)?;
            let updated_idx = if from_right { sibling_idx } else { idx };
            let slot = entries
                .get_mut(updated_idx)
                .ok_or_else(|| TreeError::CorruptBranch {
                    id: parent_id.0.clone(),
                })?;
            slot.0 = Some(new_sep);
            return Ok(());
        }

        // Merge entirely into the sibling and drop this node.
        debug!(node = %node_id, sibling = %sibling_id, "merging undersized node");
        match (self.node_mut(&sibling_id)?, node) {
            (Node::Leaf { entries: sibling }, Node::Leaf { entries: own }) => {
                if from_right {
                    sibling.splice(0..0, own);
                } else {
                    sibling.extend(own);
                }
            }
            (Node::Branch { entries: sibling }, Node::Branch { entries: mut own }) => {
                if from_right {
                    if let Some(first) = sibling.first_mut() {
                        first.0 = sibling_sep.clone();
                    }
                    sibling.splice(0..0, own);
                } else {
                    if let Some(first) = own.first_mut() {
                        first.0 = node_sep.clone();
                    }
                    sibling.extend(own);
                }
            }
            _ => {
                return Err(TreeError::CorruptBranch {
                    id: parent_id.0.clone(),
                })
            }
        }
        let entries = self.branch_entries_mut(parent_id)?;
        entries.remove(idx);
        if from_right {
            // The surviving sibling is now the leftmost child.
            if let Some(first) = entries.first_mut() {
                first.0 = None;
            }
        }
        Ok(())
    }

    /// Number of levels from root to leaf; 0 for the empty tree.
    pub fn depth(&self) -> Result<usize, TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            return Ok(0);
        }
        let mut depth = 0;
        let mut current = NodeId::root();
        loop {
            depth += 1;
            match self.node(&current)? {
                Node::Leaf { .. } => return Ok(depth),
                Node::Branch { entries } => {
                    let Some((_, child)) = entries.first() else {
                        return Err(TreeError::CorruptBranch {
                            id: current.0.clone(),
                        });
                    };
                    current = child.clone();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn tree(min: usize, max: usize) -> OrderedTree<i64, i64> {
        OrderedTree::new(TreeConfig::new(min, max).unwrap())
    }

    fn walk(
        tree: &OrderedTree<i64, i64>,
        id: &NodeId,
        is_root: bool,
        visited: &mut usize,
        keys: &mut Vec<i64>,
    ) {
        *visited += 1;
        let node = tree.nodes.get(id).expect("missing node in table");
        if is_root {
            assert!(node.len() <= tree.config.max_size);
        } else {
            assert!(
                node.len() >= tree.config.min_size && node.len() <= tree.config.max_size,
                "node {id} size {} outside bounds",
                node.len()
            );
        }
        match node {
            Node::Leaf { entries } => {
                assert!(entries.windows(2).all(|w| w[0].0 < w[1].0));
                keys.extend(entries.iter().map(|(k, _)| *k));
            }
            Node::Branch { entries } => {
                assert!(
                    entries.first().is_some_and(|(sep, _)| sep.is_none()),
                    "branch {id} first separator must be unbounded"
                );
                for w in entries.windows(2) {
                    match (&w[0].0, &w[1].0) {
                        (None, Some(_)) => {}
                        (Some(a), Some(b)) => assert!(a < b, "separators out of order"),
                        _ => panic!("unbounded separator past index 0"),
                    }
                }
                for (_, child) in entries {
                    walk(tree, child, false, visited, keys);
                }
            }
        }
    }

    fn check_invariants(tree: &OrderedTree<i64, i64>) {
        if !tree.nodes.contains_key(&NodeId::root()) {
            assert!(tree.nodes.is_empty(), "orphan nodes in empty tree");
            return;
        }
        let mut visited = 0;
        let mut keys = Vec::new();
        walk(tree, &NodeId::root(), true, &mut visited, &mut keys);
        assert_eq!(visited, tree.nodes.len(), "unreachable nodes in table");
        assert!(
            keys.windows(2).all(|w| w[0] < w[1]),
            "leaf keys not globally ascending"
        );
    }

    #[test]
    fn test_empty_tree() {
        let t = tree(2, 4);
        assert_eq!(t.get(&1).unwrap(), None);
        assert_eq!(t.depth().unwrap(), 0);
    }

    #[test]
    fn test_set_get_replace() {
        let mut t = tree(2, 4);
        t.set(1, 10).unwrap();
        t.set(2, 20).unwrap();
        assert_eq!(t.get(&1).unwrap(), Some(&10));
        t.set(1, 11).unwrap();
        assert_eq!(t.get(&1).unwrap(), Some(&11));
        assert_eq!(t.get(&3).unwrap(), None);
        assert_eq!(t.depth().unwrap(), 1);
    }

    #[test]
    fn test_split_grows_depth() {
        let mut t = tree(2, 4);
        for k in 0..40 {
            t.set(k, k).unwrap();
            check_invariants(&t);
        }
        assert!(t.depth().unwrap() > 1);
        for k in 0..40 {
            assert_eq!(t.get(&k).unwrap(), Some(&k));
        }
    }

    #[test]
    fn test_descending_inserts() {
        let mut t = tree(2, 4);
        for k in (0..40).rev() {
            t.set(k, -k).unwrap();
            check_invariants(&t);
        }
        for k in 0..40 {
            assert_eq!(t.get(&k).unwrap(), Some(&-k));
        }
    }

    #[test]
    fn test_delete_missing_is_noop() {
        let mut t = tree(2, 4);
        t.delete(&1).unwrap();
        t.set(1, 10).unwrap();
        t.delete(&2).unwrap();
        assert_eq!(t.get(&1).unwrap(), Some(&10));
    }

    #[test]
    fn test_delete_everything_empties_tree() {
        let mut t = tree(2, 4);
        for k in 0..100 {
            t.set(k, k).unwrap();
        }
        for k in 0..100 {
            t.delete(&k).unwrap();
            check_invariants(&t);
        }
        assert_eq!(t.depth().unwrap(), 0);
        assert!(t.nodes.is_empty());
    }

    #[test]
    fn test_delete_reverse_order() {
        let mut t = tree(2, 4);
        for k in 0..100 {
            t.set(k, k).unwrap();
        }
        for k in (0..100).rev() {
            t.delete(&k).unwrap();
            check_invariants(&t);
            for live in 0..k {
                assert_eq!(t.get(&live).unwrap(), Some(&live));
            }
        }
        assert_eq!(t.depth().unwrap(), 0);
    }

    #[test]
    fn test_randomized_churn_matches_model() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut t = tree(2, 5);
        let mut model = BTreeMap::new();
        let mut keys: Vec<i64> = (0..400).collect();
        keys.shuffle(&mut rng);

        for &k in &keys {
            t.set(k, k * 10).unwrap();
            model.insert(k, k * 10);
            check_invariants(&t);
        }
        for &k in keys.iter().take(50) {
            t.set(k, k * 100).unwrap();
            model.insert(k, k * 100);
        }

        keys.shuffle(&mut rng);
        for &k in &keys {
            assert_eq!(t.get(&k).unwrap().copied(), model.get(&k).copied());
            if rng.random_bool(0.7) {
                t.delete(&k).unwrap();
                model.remove(&k);
                check_invariants(&t);
            }
        }
        for &k in &keys {
            assert_eq!(t.get(&k).unwrap().copied(), model.get(&k).copied());
            t.delete(&k).unwrap();
            check_invariants(&t);
        }
        assert_eq!(t.depth().unwrap(), 0);
    }

    #[test]
    fn test_string_keys() {
        let mut t: OrderedTree<String, u32> = OrderedTree::new(TreeConfig::new(2, 4).unwrap());
        for (i, name) in ["ant", "bee", "cat", "dog", "eel", "fox", "gnu"]
            .iter()
            .enumerate()
        {
            t.set((*name).to_string(), i as u32).unwrap();
        }
        assert_eq!(t.get(&"dog".to_string()).unwrap(), Some(&3));
        assert_eq!(t.get(&"yak".to_string()).unwrap(), None);
    }
}
