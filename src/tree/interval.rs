// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Interval overlap index: the node-addressed tree keyed by
//! `(min, max, disambiguator)` tuples, with every node augmented by the
//! maximum interval upper bound in its subtree. The augmentation lets
//! overlap queries prune entire subtrees whose covered range cannot
//! intersect the query.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use super::error::TreeError;
use super::node::{child_index, separator_position, NodeId, TreeConfig};

/// A closed query interval `[min, max]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval<B> {
    pub min: B,
    pub max: B,
}

impl<B> Interval<B> {
    pub fn new(min: B, max: B) -> Self {
        Self { min, max }
    }
}

/// Composite key for a stored interval.
///
/// The disambiguator keeps intervals with identical bounds distinguishable
/// and totally ordered; derived ordering is the `(min, max, id)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IntervalKey<B> {
    pub min: B,
    pub max: B,
    pub id: String,
}

impl<B> IntervalKey<B> {
    pub fn new(min: B, max: B, id: impl Into<String>) -> Self {
        Self {
            min,
            max,
            id: id.into(),
        }
    }
}

/// A node of the interval tree. Shaped like [`Node`](super::node::Node)
/// plus the subtree-wide `range_max` bound.
#[derive(Debug, Clone)]
enum IntervalNode<B, V> {
    Leaf {
        entries: Vec<(IntervalKey<B>, V)>,
        range_max: B,
    },
    Branch {
        entries: Vec<(Option<IntervalKey<B>>, NodeId)>,
        range_max: B,
    },
}

impl<B, V> IntervalNode<B, V> {
    #[inline]
    fn len(&self) -> usize {
        match self {
            IntervalNode::Leaf { entries, .. } => entries.len(),
            IntervalNode::Branch { entries, .. } => entries.len(),
        }
    }

    #[inline]
    fn range_max(&self) -> &B {
        match self {
            IntervalNode::Leaf { range_max, .. } | IntervalNode::Branch { range_max, .. } => {
                range_max
            }
        }
    }
}

/// An augmented tree answering "which stored intervals overlap this range".
#[derive(Debug)]
pub struct IntervalTree<B, V> {
    config: TreeConfig,
    nodes: HashMap<NodeId, IntervalNode<B, V>>,
}

impl<B: Ord + Clone, V> IntervalTree<B, V> {
    /// Creates an empty interval tree with the given size bounds.
    pub fn new(config: TreeConfig) -> Self {
        Self {
            config,
            nodes: HashMap::new(),
        }
    }

    fn node(&self, id: &NodeId) -> Result<&IntervalNode<B, V>, TreeError> {
        self.nodes
            .get(id)
            .ok_or_else(|| TreeError::MissingNode { id: id.0.clone() })
    }

    fn node_mut(&mut self, id: &NodeId) -> Result<&mut IntervalNode<B, V>, TreeError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| TreeError::MissingNode { id: id.0.clone() })
    }

    fn branch_entries(
        &self,
        id: &NodeId,
    ) -> Result<&Vec<(Option<IntervalKey<B>>, NodeId)>, TreeError> {
        match self.node(id)? {
            IntervalNode::Branch { entries, .. } => Ok(entries),
            IntervalNode::Leaf { .. } => Err(TreeError::CorruptBranch { id: id.0.clone() }),
        }
    }

    fn branch_entries_mut(
        &mut self,
        id: &NodeId,
    ) -> Result<&mut Vec<(Option<IntervalKey<B>>, NodeId)>, TreeError> {
        match self.node_mut(id)? {
            IntervalNode::Branch { entries, .. } => Ok(entries),
            IntervalNode::Leaf { .. } => Err(TreeError::CorruptBranch { id: id.0.clone() }),
        }
    }

    /// Recomputes this node's `range_max` from its own contents (leaf) or
    /// its children's bounds (branch). Children must already be accurate.
    fn recompute_range_max(&mut self, id: &NodeId) -> Result<(), TreeError> {
        let computed = match self.node(id)? {
            IntervalNode::Leaf { entries, .. } => {
                entries.iter().map(|(k, _)| k.max.clone()).max()
            }
            IntervalNode::Branch { entries, .. } => {
                let mut best: Option<B> = None;
                for (_, child) in entries {
                    let m = self.node(child)?.range_max().clone();
                    best = Some(match best {
                        Some(b) if b >= m => b,
                        _ => m,
                    });
                }
                best
            }
        };
        if let Some(m) = computed {
            match self.node_mut(id)? {
                IntervalNode::Leaf { range_max, .. }
                | IntervalNode::Branch { range_max, .. } => *range_max = m,
            }
        }
        Ok(())
    }

    /// Collects every stored interval overlapping `range`, in traversal
    /// order (not sorted).
    ///
    /// Overlap is closed-interval: `range.min <= item.max && range.max >=
    /// item.min`. Branches are descended only when the child's covered
    /// range `[separator.min, child.range_max]` (unbounded-below for the
    /// leftmost child) can intersect the query.
    pub fn overlaps(&self, range: &Interval<B>) -> Result<Vec<(IntervalKey<B>, &V)>, TreeError> {
        let mut results = Vec::new();
        if !self.nodes.contains_key(&NodeId::root()) {
            return Ok(results);
        }
        let mut queue = VecDeque::from([NodeId::root()]);
        while let Some(id) = queue.pop_front() {
            match self.node(&id)? {
                IntervalNode::Leaf { entries, .. } => {
                    for (key, value) in entries {
                        if range.min <= key.max && range.max >= key.min {
                            results.push((key.clone(), value));
                        }
                    }
                }
                IntervalNode::Branch { entries, .. } => {
                    for (sep, child_id) in entries {
                        let child = self.node(child_id)?;
                        let lower_ok = match sep {
                            None => true,
                            Some(s) => s.min <= range.max,
                        };
                        if lower_ok && range.min <= *child.range_max() {
                            queue.push_back(child_id.clone());
                        }
                    }
                }
            }
        }
        Ok(results)
    }

    /// Inserts or replaces the value stored under `key`.
    ///
    /// Every node on the descent path absorbs `key.max` into its
    /// `range_max`, whether or not a split follows; a new maximum must
    /// propagate to the root even on pure insert paths.
    pub fn set(&mut self, key: IntervalKey<B>, value: V) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            let range_max = key.max.clone();
            self.nodes.insert(
                NodeId::root(),
                IntervalNode::Leaf {
                    entries: vec![(key, value)],
                    range_max,
                },
            );
            return Ok(());
        }
        let mut ancestors: Vec<NodeId> = Vec::new();
        let mut current = NodeId::root();
        loop {
            match self.node(&current)? {
                IntervalNode::Leaf { .. } => break,
                IntervalNode::Branch { entries, .. } => {
                    let idx = child_index(entries, &key, &current)?;
                    let child = entries[idx].1.clone();
                    ancestors.push(current);
                    current = child;
                }
            }
        }

        let new_max = key.max.clone();
        {
            let IntervalNode::Leaf { entries, .. } = self.node_mut(&current)? else {
                return Err(TreeError::CorruptBranch {
                    id: current.0.clone(),
                });
            };
            match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(i) => {
                    // Same composite key, same bounds: no augmentation or
                    // structure change.
                    entries[i].1 = value;
                    return Ok(());
                }
                Err(i) => entries.insert(i, (key, value)),
            }
        }
        for id in ancestors.iter().chain(std::iter::once(&current)) {
            match self.node_mut(id)? {
                IntervalNode::Leaf { range_max, .. }
                | IntervalNode::Branch { range_max, .. } => {
                    if *range_max < new_max {
                        *range_max = new_max.clone();
                    }
                }
            }
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
                IntervalNode::Leaf { entries, range_max } => {
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
                    let right_max = range_max.clone();
                    (
                        IntervalNode::Leaf {
                            entries: right,
                            range_max: right_max,
                        },
                        right_min,
                    )
                }
                IntervalNode::Branch { entries, range_max } => {
                    let mid = entries.len().div_ceil(2);
                    let mut right = entries.split_off(mid);
                    let right_min = match right.first_mut().and_then(|(sep, _)| sep.take()) {
                        Some(k) => k,
                        None => {
                            return Err(TreeError::CorruptBranch {
                                id: current.0.clone(),
                            })
                        }
                    };
                    let right_max = range_max.clone();
                    (
                        IntervalNode::Branch {
                            entries: right,
                            range_max: right_max,
                        },
                        right_min,
                    )
                }
            };
            debug!(node = %current, right = %right_id, "split oversized interval node");
            self.nodes.insert(right_id.clone(), right_node);
            // Both halves carried the pre-split bound; tighten them.
            self.recompute_range_max(&current)?;
            self.recompute_range_max(&right_id)?;

            if current.is_root() {
                let left_id = NodeId::generate();
                let old_root = self.nodes.remove(&NodeId::root()).ok_or_else(|| {
                    TreeError::MissingNode {
                        id: NodeId::ROOT.to_string(),
                    }
                })?;
                let range_max = match (old_root.range_max(), self.node(&right_id)?.range_max()) {
                    (a, b) if a >= b => a.clone(),
                    (_, b) => b.clone(),
                };
                self.nodes.insert(left_id.clone(), old_root);
                self.nodes.insert(
                    NodeId::root(),
                    IntervalNode::Branch {
                        entries: vec![(None, left_id), (Some(right_min), right_id)],
                        range_max,
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

    /// Removes the interval stored under `key` if present.
    ///
    /// After any structural change, `range_max` is recomputed bottom-up for
    /// every node remaining on the descent path so it never overstates the
    /// true subtree maximum. A stale bound here would silently drop
    /// overlaps from query results.
    pub fn delete(&mut self, key: &IntervalKey<B>) -> Result<(), TreeError> {
        if !self.nodes.contains_key(&NodeId::root()) {
            return Ok(());
        }
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut current = NodeId::root();
        loop {
            match self.node(&current)? {
                IntervalNode::Leaf { .. } => break,
                IntervalNode::Branch { entries, .. } => {
                    let idx = child_index(entries, key, &current)?;
                    let child = entries[idx].1.clone();
                    path.push((current, idx));
                    current = child;
                }
            }
        }
        let min_changed;
        {
            let IntervalNode::Leaf { entries, .. } = self.node_mut(&current)? else {
                return Err(TreeError::CorruptBranch {
                    id: current.0.clone(),
                });
            };
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
        let audit: Vec<NodeId> = std::iter::once(current.clone())
            .chain(path.iter().rev().map(|(id, _)| id.clone()))
            .collect();
        self.rebalance_upward(current, path, min_changed)?;
        // Bottom-up pass over whatever survives of the descent path;
        // merged-away nodes are simply gone from the table.
        for id in audit {
            if self.nodes.contains_key(&id) {
                self.recompute_range_max(&id)?;
            }
        }
        Ok(())
    }

    fn rebalance_upward(
        &mut self,
        mut current: NodeId,
        mut path: Vec<(NodeId, usize)>,
        mut pending_min: Option<IntervalKey<B>>,
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
                IntervalNode::Leaf { entries, .. } => {
                    if entries.is_empty() {
                        self.nodes.remove(&NodeId::root());
                    }
                    return Ok(());
                }
                IntervalNode::Branch { entries, .. } => {
                    if entries.len() != 1 {
                        return Ok(());
                    }
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
            debug!(node = %node_id, sibling = %sibling_id, move_count, "redistributing interval entries");
            let new_sep = match (self.node_mut(&sibling_id)?, &mut node) {
                (
                    IntervalNode::Leaf {
                        entries: sibling, ..
                    },
                    IntervalNode::Leaf { entries: own, .. },
                ) => {
                    if from_right {
                        own.extend(sibling.drain(0..move_count));
                        sibling.first().map(|(k, _)| k.clone())
                    } else {
                        let moved = sibling.split_off(sibling.len() - move_count);
                        own.splice(0..0, moved);
                        own.first().map(|(k, _)| k.clone())
                    }
                }
                (
                    IntervalNode::Branch {
                        entries: sibling, ..
                    },
                    IntervalNode::Branch { entries: own, .. },
                ) => {
                    if from_right {
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
            // Entries changed hands on both sides of the boundary.
            self.recompute_range_max(node_id)?;
            self.recompute_range_max(&sibling_id)?;
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

        debug!(node = %node_id, sibling = %sibling_id, "merging undersized interval node");
        match (self.node_mut(&sibling_id)?, node) {
            (
                IntervalNode::Leaf {
                    entries: sibling, ..
                },
                IntervalNode::Leaf { entries: own, .. },
            ) => {
                if from_right {
                    sibling.splice(0..0, own);
                } else {
                    sibling.extend(own);
                }
            }
            (
                IntervalNode::Branch {
                    entries: sibling, ..
                },
                IntervalNode::Branch {
                    entries: mut own, ..
                },
            ) => {
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
        self.recompute_range_max(&sibling_id)?;
        let entries = self.branch_entries_mut(parent_id)?;
        entries.remove(idx);
        if from_right {
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
                IntervalNode::Leaf { .. } => return Ok(depth),
                IntervalNode::Branch { entries, .. } => {
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
