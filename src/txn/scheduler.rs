// Copyright 2026 Madrone Contributors
// SPDX-License-Identifier: Apache-2.0

//! Cooperative multi-key read/write lock scheduler.
//!
//! One lock state machine per key, created lazily and dropped once no
//! holders or waiters remain. Each key permits many concurrent readers or
//! exactly one writer, with FIFO fairness among waiters: a request is
//! granted immediately only when nothing is queued ahead of it and its
//! mode is compatible with the current holders; otherwise it waits its
//! turn, and releases drain the queue front-first (a run of readers
//! together, a writer alone).

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::store::Key;

use super::lock::{LockMode, LockRequest};

struct Waiter {
    mode: LockMode,
    ready: oneshot::Sender<()>,
}

#[derive(Default)]
struct KeyLock {
    readers: usize,
    writer: bool,
    queue: VecDeque<Waiter>,
}

impl KeyLock {
    fn compatible(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Read => !self.writer,
            LockMode::Write => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers += 1,
            LockMode::Write => self.writer = true,
        }
    }

    fn revoke(&mut self, mode: LockMode) {
        match mode {
            LockMode::Read => self.readers = self.readers.saturating_sub(1),
            LockMode::Write => self.writer = false,
        }
    }

    fn idle(&self) -> bool {
        self.readers == 0 && !self.writer && self.queue.is_empty()
    }
}

/// Registry of per-key read/write locks.
///
/// There is no cross-key deadlock detection: callers that acquire keys in
/// inconsistent orders across concurrent runs can deadlock. There is also
/// no timeout; a holder that never releases keeps its keys locked.
#[derive(Default)]
pub struct LockScheduler {
    keys: Mutex<HashMap<Key, KeyLock>>,
}

impl LockScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires one lock, waiting in the key's FIFO queue if necessary.
    ///
    /// The returned guard must be released exactly once; releasing it
    /// again is a no-op.
    pub async fn acquire(self: &Arc<Self>, key: Key, mode: LockMode) -> LockGuard {
        let pending = {
            let mut keys = self.keys.lock();
            let state = keys.entry(key.clone()).or_default();
            if state.queue.is_empty() && state.compatible(mode) {
                state.grant(mode);
                None
            } else {
                let (ready, wait) = oneshot::channel();
                state.queue.push_back(Waiter { mode, ready });
                debug!(key = ?key, ?mode, "lock request queued");
                Some(wait)
            }
        };
        if let Some(wait) = pending {
            // The grant is recorded by the releasing side before the
            // signal is sent, so a received signal means we hold the lock.
            let _ = wait.await;
        }
        LockGuard {
            scheduler: Arc::clone(self),
            key,
            mode,
            released: AtomicBool::new(false),
        }
    }

    fn release(&self, key: &Key, mode: LockMode) {
        let mut keys = self.keys.lock();
        let Some(state) = keys.get_mut(key) else {
            return;
        };
        state.revoke(mode);
        loop {
            let Some(front_mode) = state.queue.front().map(|w| w.mode) else {
                break;
            };
            if !state.compatible(front_mode) {
                break;
            }
            let Some(waiter) = state.queue.pop_front() else {
                break;
            };
            state.grant(waiter.mode);
            if waiter.ready.send(()).is_err() {
                // The waiter went away before its turn came up.
                state.revoke(waiter.mode);
            }
        }
        if state.idle() {
            keys.remove(key);
        }
    }

    /// Runs a transaction body under this scheduler.
    ///
    /// The body receives a [`LockSession`] through which it declares lock
    /// needs incrementally, across any number of suspension points. When
    /// the body's future completes, every lock acquired over the whole run
    /// is released exactly once and the body's output is returned.
    pub async fn run<F, Fut, T>(self: &Arc<Self>, body: F) -> T
    where
        F: FnOnce(LockSession) -> Fut,
        Fut: Future<Output = T>,
    {
        let session = LockSession {
            scheduler: Arc::clone(self),
            held: Arc::new(Mutex::new(Vec::new())),
        };
        let cleanup = session.clone();
        let out = body(session).await;
        cleanup.release_all();
        out
    }
}

/// Release handle for one held lock.
pub struct LockGuard {
    scheduler: Arc<LockScheduler>,
    key: Key,
    mode: LockMode,
    released: AtomicBool,
}

impl LockGuard {
    /// Releases the lock. Idempotent: the second and later calls do
    /// nothing.
    pub fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.scheduler.release(&self.key, self.mode);
        }
    }

    /// The locked key.
    #[inline]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// The granted mode.
    #[inline]
    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("mode", &self.mode)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish()
    }
}

/// A transaction body's handle for declaring lock needs.
///
/// Cloneable so the driving [`LockScheduler::run`] can release everything
/// the body acquired once it finishes.
#[derive(Clone)]
pub struct LockSession {
    scheduler: Arc<LockScheduler>,
    held: Arc<Mutex<Vec<LockGuard>>>,
}

impl LockSession {
    /// Acquires every lock in `request`, recording the release handles.
    ///
    /// Individual per-key acquisitions await that key's FIFO queue; the
    /// request's keys are taken in sorted order.
    pub async fn acquire(&self, request: LockRequest) {
        for (key, mode) in request {
            let guard = self.scheduler.acquire(key, mode).await;
            self.held.lock().push(guard);
        }
    }

    /// Releases every lock acquired through this session, exactly once.
    pub fn release_all(&self) {
        for guard in self.held.lock().drain(..) {
            guard.release();
        }
    }

    /// Number of locks currently held by this session.
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BackingStore, OrderedKvStore, Value, WriteBatch};
    use std::time::Duration;
    use tokio::time::sleep;

    fn scheduler() -> Arc<LockScheduler> {
        Arc::new(LockScheduler::new())
    }

    #[tokio::test]
    async fn test_readers_share() {
        let s = scheduler();
        let a = s.acquire(Key::from("k"), LockMode::Read).await;
        let b = s.acquire(Key::from("k"), LockMode::Read).await;
        a.release();
        b.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_writer_excludes_readers() {
        let s = scheduler();
        let w = s.acquire(Key::from("k"), LockMode::Write).await;

        let s2 = Arc::clone(&s);
        let reader = tokio::spawn(async move {
            let g = s2.acquire(Key::from("k"), LockMode::Read).await;
            g.release();
        });

        // The reader cannot get in while the writer holds the key.
        sleep(Duration::from_millis(50)).await;
        assert!(!reader.is_finished());

        w.release();
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let s = scheduler();
        let g = s.acquire(Key::from("k"), LockMode::Write).await;
        g.release();
        g.release();
        // A fresh writer acquires immediately; a double release would have
        // corrupted the state.
        let g2 = s.acquire(Key::from("k"), LockMode::Write).await;
        g2.release();
    }

    #[tokio::test]
    async fn test_state_garbage_collected() {
        let s = scheduler();
        let g = s.acquire(Key::from("k"), LockMode::Write).await;
        assert_eq!(s.keys.lock().len(), 1);
        g.release();
        assert_eq!(s.keys.lock().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queued_reader_waits_behind_earlier_writer() {
        // FIFO: a reader arriving after a queued writer waits for it even
        // though it is compatible with the current reader.
        let s = scheduler();
        let first = s.acquire(Key::from("k"), LockMode::Read).await;

        let order = Arc::new(Mutex::new(Vec::new()));

        let s2 = Arc::clone(&s);
        let order2 = Arc::clone(&order);
        let writer = tokio::spawn(async move {
            let g = s2.acquire(Key::from("k"), LockMode::Write).await;
            order2.lock().push("writer");
            g.release();
        });

        sleep(Duration::from_millis(10)).await;

        let s3 = Arc::clone(&s);
        let order3 = Arc::clone(&order);
        let reader = tokio::spawn(async move {
            let g = s3.acquire(Key::from("k"), LockMode::Read).await;
            order3.lock().push("reader");
            g.release();
        });

        sleep(Duration::from_millis(10)).await;
        assert!(order.lock().is_empty());

        first.release();
        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(*order.lock(), vec!["writer", "reader"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_releases_incremental_acquisitions() {
        let s = scheduler();
        let out = s
            .run(|session| async move {
                session.acquire(LockRequest::new().read("a")).await;
                sleep(Duration::from_millis(5)).await;
                session.acquire(LockRequest::new().write("b")).await;
                assert_eq!(session.held_count(), 2);
                42
            })
            .await;
        assert_eq!(out, 42);
        // Everything was released: both keys are immediately writable.
        let a = s.acquire(Key::from("a"), LockMode::Write).await;
        let b = s.acquire(Key::from("b"), LockMode::Write).await;
        a.release();
        b.release();
    }

    /// Five transactions against one key with staggered starts: modes
    /// read, read, write, write, read arriving at 0, 2, 1, 3, 4 time
    /// units, each holding its lock for 10 units. FIFO queue order is
    /// r1, w1, r2, w2, r3, so the values observed must track exactly the
    /// writes of the writers queued ahead.
    #[tokio::test(start_paused = true)]
    async fn test_fifo_interleaving_across_five_transactions() {
        let s = scheduler();
        let store = Arc::new(OrderedKvStore::new());
        let key = Key::from("x");

        async fn reader(
            s: Arc<LockScheduler>,
            store: Arc<OrderedKvStore>,
            key: Key,
            delay: u64,
        ) -> Option<Value> {
            sleep(Duration::from_millis(delay)).await;
            s.run(|session| async move {
                session
                    .acquire(LockRequest::new().read("x"))
                    .await;
                let seen = store.get(&key).unwrap().map(|e| e.value);
                sleep(Duration::from_millis(10)).await;
                seen
            })
            .await
        }

        async fn writer(
            s: Arc<LockScheduler>,
            store: Arc<OrderedKvStore>,
            key: Key,
            delay: u64,
            value: i64,
        ) -> Option<Value> {
            sleep(Duration::from_millis(delay)).await;
            s.run(|session| async move {
                session
                    .acquire(LockRequest::new().write("x"))
                    .await;
                let seen = store.get(&key).unwrap().map(|e| e.value);
                store
                    .write(WriteBatch::new().set(key.clone(), value))
                    .unwrap();
                sleep(Duration::from_millis(10)).await;
                seen
            })
            .await
        }

        let (r1, r2, w1, w2, r3) = tokio::join!(
            reader(Arc::clone(&s), Arc::clone(&store), key.clone(), 0),
            reader(Arc::clone(&s), Arc::clone(&store), key.clone(), 2),
            writer(Arc::clone(&s), Arc::clone(&store), key.clone(), 1, 1),
            writer(Arc::clone(&s), Arc::clone(&store), key.clone(), 3, 2),
            reader(Arc::clone(&s), Arc::clone(&store), key.clone(), 4),
        );

        // Queue order by arrival: r1(0), w1(1), r2(2), w2(3), r3(4).
        assert_eq!(r1, None, "first reader precedes every write");
        assert_eq!(w1, None, "first writer runs after r1, sees nothing");
        assert_eq!(r2, Some(Value::Number(1.0)), "r2 queued behind w1");
        assert_eq!(w2, Some(Value::Number(1.0)), "w2 queued behind r2");
        assert_eq!(r3, Some(Value::Number(2.0)), "r3 queued behind w2");
    }
}
