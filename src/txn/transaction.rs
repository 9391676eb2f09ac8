// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Lock-based transactions over a backing store.
//!
//! A [`Transaction`] buffers writes locally and serves reads through a
//! cache, taking per-key locks from a shared [`LockScheduler`] as keys are
//! touched. Commit flushes the buffered writes as one batch carrying a
//! version check for every cached read, then releases the locks; because
//! the locks were held since each key was first read, the checks cannot
//! fail under this transactor and exist to guard against writes that
//! bypass it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::store::{BackingStore, Key, Value, Version, WriteBatch};

use super::error::TxnError;
use super::lock::LockMode;
use super::scheduler::{LockGuard, LockScheduler};

/// Factory for transactions sharing one store and one lock scheduler.
pub struct Transactor<S> {
    store: Arc<S>,
    scheduler: Arc<LockScheduler>,
}

impl<S: BackingStore> Transactor<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scheduler: Arc::new(LockScheduler::new()),
        }
    }

    /// Creates a transactor backed by an existing scheduler, so that
    /// transactions coordinate with other users of the same locks.
    pub fn with_scheduler(store: Arc<S>, scheduler: Arc<LockScheduler>) -> Self {
        Self { store, scheduler }
    }

    /// Begins a transaction. Locks are taken lazily as keys are touched.
    pub fn begin(&self) -> Transaction<S> {
        Transaction {
            store: Arc::clone(&self.store),
            scheduler: Arc::clone(&self.scheduler),
            locks: HashMap::new(),
            reads: HashMap::new(),
            writes: BTreeMap::new(),
        }
    }
}

/// A single in-flight transaction.
///
/// Reads are cached: the first `get` of a key takes a read lock and
/// consults the store; later gets serve the buffered write or the cached
/// read without touching the store again. `set`/`delete` take a write
/// lock (upgrading a held read lock) and buffer the change until
/// [`commit`](Self::commit).
pub struct Transaction<S> {
    store: Arc<S>,
    scheduler: Arc<LockScheduler>,
    locks: HashMap<Key, LockGuard>,
    reads: HashMap<Key, Option<(Value, Version)>>,
    writes: BTreeMap<Key, Option<Value>>,
}

impl<S: BackingStore> Transaction<S> {
    /// Ensures a lock of at least `mode` is held for `key`.
    ///
    /// Upgrading from read to write releases the read guard before
    /// queuing for the write lock, so another writer may slip in between;
    /// the cached read's version check catches that at commit.
    async fn lock(&mut self, key: &Key, mode: LockMode) {
        if let Some(held) = self.locks.get(key) {
            if held.mode() == LockMode::Write || mode == LockMode::Read {
                return;
            }
            debug!(key = ?key, "upgrading read lock to write");
            if let Some(guard) = self.locks.remove(key) {
                guard.release();
            }
        }
        let guard = self.scheduler.acquire(key.clone(), mode).await;
        self.locks.insert(key.clone(), guard);
    }

    /// Reads a key, from the write buffer, the read cache, or the store.
    pub async fn get(&mut self, key: impl Into<Key>) -> Result<Option<Value>, TxnError> {
        let key = key.into();
        if let Some(buffered) = self.writes.get(&key) {
            return Ok(buffered.clone());
        }
        if let Some(cached) = self.reads.get(&key) {
            return Ok(cached.as_ref().map(|(value, _)| value.clone()));
        }
        self.lock(&key, LockMode::Read).await;
        let found = self
            .store
            .get(&key)?
            .map(|entry| (entry.value, entry.version));
        let value = found.as_ref().map(|(value, _)| value.clone());
        self.reads.insert(key, found);
        Ok(value)
    }

    /// Buffers a write for `key`.
    pub async fn set(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        self.lock(&key, LockMode::Write).await;
        self.writes.insert(key, Some(value.into()));
    }

    /// Buffers a delete for `key`.
    pub async fn delete(&mut self, key: impl Into<Key>) {
        let key = key.into();
        self.lock(&key, LockMode::Write).await;
        self.writes.insert(key, None);
    }

    /// Flushes buffered writes as one batch and releases every lock.
    ///
    /// Returns the version stamped on the batch, or `None` when nothing
    /// was buffered. Cached reads become `check` preconditions on the
    /// batch; a conflicting out-of-band write surfaces as
    /// [`StoreError::Conflict`](crate::store::StoreError) with nothing
    /// applied.
    pub fn commit(mut self) -> Result<Option<Version>, TxnError> {
        let result = self.flush();
        self.release_locks();
        result
    }

    fn flush(&mut self) -> Result<Option<Version>, TxnError> {
        if self.writes.is_empty() {
            return Ok(None);
        }
        let mut batch = WriteBatch::new();
        for (key, cached) in self.reads.drain() {
            batch = batch.check(key, cached.map(|(_, version)| version));
        }
        for (key, write) in std::mem::take(&mut self.writes) {
            batch = match write {
                Some(value) => batch.set(key, value),
                None => batch.delete(key),
            };
        }
        let receipt = self.store.write(batch)?;
        debug!(version = receipt.version.0, "transaction committed");
        Ok(Some(receipt.version))
    }

    /// Abandons buffered writes and releases every lock.
    pub fn release(mut self) {
        self.release_locks();
    }

    fn release_locks(&mut self) {
        for (_, guard) in self.locks.drain() {
            guard.release();
        }
    }
}
