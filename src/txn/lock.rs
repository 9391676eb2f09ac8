// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lock modes and request maps.

use std::collections::btree_map::IntoIter;
use std::collections::BTreeMap;

use crate::store::Key;

/// Lock modes for read/write access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Shared lock for reads (multiple readers allowed).
    Read,
    /// Exclusive lock for writes (single writer, no readers).
    Write,
}

/// A set of per-key lock needs declared in one step.
///
/// Requesting both modes for one key keeps the stronger write mode. Keys
/// are held in sorted order so a request's locks are always acquired in a
/// consistent order; callers that keep a consistent order *across*
/// requests avoid cross-key deadlocks, which the scheduler does not
/// detect.
#[derive(Debug, Clone, Default)]
pub struct LockRequest {
    modes: BTreeMap<Key, LockMode>,
}

impl LockRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a read-lock need for `key`.
    pub fn read(mut self, key: impl Into<Key>) -> Self {
        self.modes.entry(key.into()).or_insert(LockMode::Read);
        self
    }

    /// Adds a write-lock need for `key`, upgrading an existing read need.
    pub fn write(mut self, key: impl Into<Key>) -> Self {
        self.modes.insert(key.into(), LockMode::Write);
        self
    }

    /// Returns true if no locks are requested.
    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Number of keys requested.
    pub fn len(&self) -> usize {
        self.modes.len()
    }
}

impl IntoIterator for LockRequest {
    type Item = (Key, LockMode);
    type IntoIter = IntoIter<Key, LockMode>;

    fn into_iter(self) -> Self::IntoIter {
        self.modes.into_iter()
    }
}
