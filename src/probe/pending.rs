//! Pending table: outstanding round trips keyed by correlation key.
//!
//! Every entry owns the sending half of a one-shot channel. Resolution,
//! expiry, caller cancellation, sweeping and shutdown all start by removing
//! the entry under the table lock, so exactly one of them fulfils a given
//! registration. The others find nothing to remove and become no-ops.
//! Resolution and shutdown send their value before releasing the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ExecutionError;

use super::key::CorrelationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Delivered,
    Cancelled,
}

/// Final state of a waiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A matching delivered event resolved the entry.
    Delivered,
    /// The deadline passed first.
    Expired,
    /// The table was closed for shutdown.
    Cancelled,
}

#[derive(Debug)]
struct Entry {
    registration: u64,
    deadline: Instant,
    tx: oneshot::Sender<Resolution>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CorrelationKey, Entry>,
    closed: bool,
}

/// Concurrency-safe map of in-flight probes.
///
/// At most one entry exists per key. A second registration for a key that is
/// still outstanding is rejected with `ExecutionError::Collision`.
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<Inner>,
    next_registration: AtomicU64,
}

impl PendingTable {
    #[allow(missing_docs)]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending probe and returns the handle to wait on.
    ///
    /// # Errors
    ///
    /// - `ExecutionError::Timeout` if `deadline` has already passed
    /// - `ExecutionError::Collision` if `key` is already outstanding
    /// - `ExecutionError::ShuttingDown` after [`PendingTable::close`]
    pub fn register(
        self: &Arc<Self>,
        key: CorrelationKey,
        deadline: Instant,
    ) -> Result<Waiter, ExecutionError> {
        if deadline <= Instant::now() {
            return Err(ExecutionError::Timeout { key, waited_ms: 0 });
        }

        let (tx, rx) = oneshot::channel();
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        {
            let mut inner = self.lock();
            if inner.closed {
                return Err(ExecutionError::ShuttingDown);
            }
            if inner.entries.contains_key(&key) {
                return Err(ExecutionError::Collision { key });
            }
            inner.entries.insert(
                key.clone(),
                Entry {
                    registration,
                    deadline,
                    tx,
                },
            );
        }

        Ok(Waiter {
            table: Arc::clone(self),
            key,
            registration,
            deadline,
            rx: Some(rx),
            finished: false,
        })
    }

    /// Resolves the entry for `key`.
    ///
    /// Returns true only for the call that actually fulfilled a still
    /// outstanding entry. Unknown, expired and already resolved keys are
    /// no-ops returning false.
    pub fn resolve(&self, key: &CorrelationKey) -> bool {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.remove(key) else {
            return false;
        };
        // Sent under the lock: a waiter whose timer fired and lost the
        // removal always finds the value afterwards.
        entry.tx.send(Resolution::Delivered).is_ok()
    }

    /// Expires the entry for `key` regardless of which registration owns it.
    ///
    /// Returns true if an entry was removed.
    pub fn expire(&self, key: &CorrelationKey) -> bool {
        self.lock().entries.remove(key).is_some()
    }

    fn expire_registration(&self, key: &CorrelationKey, registration: u64) -> bool {
        let mut inner = self.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.registration == registration => {
                inner.entries.remove(key);
                true
            }
            _ => false,
        }
    }

    /// True if `key` is still outstanding.
    #[must_use]
    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Number of outstanding probes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[allow(missing_docs)]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries whose deadline is at or before `now`.
    ///
    /// Their waiters observe `WaitOutcome::Expired`. Returns how many entries
    /// were removed.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.deadline > now);
        before - inner.entries.len()
    }

    /// Releases every outstanding waiter as cancelled and refuses further
    /// registrations. Returns how many waiters were released.
    pub fn close(&self) -> usize {
        let mut inner = self.lock();
        inner.closed = true;
        let released = inner.entries.len();
        for (_, entry) in inner.entries.drain() {
            let _ = entry.tx.send(Resolution::Cancelled);
        }
        released
    }

    /// True once [`PendingTable::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Periodically sweeps expired entries until `cancel` fires.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let swept = self.sweep_expired(Instant::now());
                    if swept > 0 {
                        debug!(swept, "swept expired pending probes");
                    }
                }
            }
        }
    }
}

/// Handle on a registered pending probe.
///
/// Dropping the handle before it finishes deregisters the entry, so a caller
/// whose connection goes away never leaks a pending probe.
#[derive(Debug)]
pub struct Waiter {
    table: Arc<PendingTable>,
    key: CorrelationKey,
    registration: u64,
    deadline: Instant,
    rx: Option<oneshot::Receiver<Resolution>>,
    finished: bool,
}

impl Waiter {
    /// The key this waiter is registered under.
    #[must_use]
    pub const fn key(&self) -> &CorrelationKey {
        &self.key
    }

    /// Absolute deadline of the registration.
    #[must_use]
    pub const fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Waits until the entry is resolved, expires or is cancelled.
    pub async fn wait(mut self) -> WaitOutcome {
        let Some(mut rx) = self.rx.take() else {
            return WaitOutcome::Expired;
        };

        let outcome = match tokio::time::timeout_at(self.deadline, &mut rx).await {
            Ok(Ok(resolution)) => resolution.into(),
            // Sender dropped without a value: swept or expired by someone else.
            Ok(Err(_)) => WaitOutcome::Expired,
            Err(_) => {
                if self.table.expire_registration(&self.key, self.registration) {
                    WaitOutcome::Expired
                } else {
                    // The entry was already taken: a resolution may have
                    // landed between the timer firing and the removal.
                    match rx.try_recv() {
                        Ok(resolution) => resolution.into(),
                        Err(_) => WaitOutcome::Expired,
                    }
                }
            }
        };
        self.finished = true;
        outcome
    }

    /// Deregisters without waiting (used when the trigger fails).
    pub fn abandon(mut self) {
        self.table.expire_registration(&self.key, self.registration);
        self.finished = true;
    }
}

impl From<Resolution> for WaitOutcome {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Delivered => Self::Delivered,
            Resolution::Cancelled => Self::Cancelled,
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if !self.finished {
            self.table.expire_registration(&self.key, self.registration);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(topic: &str) -> CorrelationKey {
        CorrelationKey::PubSub {
            topic: topic.to_string(),
        }
    }

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn resolve_before_wait_is_delivered() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key("a"), in_secs(5)).unwrap();
        assert!(table.contains(&key("a")));

        assert!(table.resolve(&key("a")));
        assert!(!table.contains(&key("a")));
        assert_eq!(waiter.wait().await, WaitOutcome::Delivered);
    }

    #[tokio::test]
    async fn second_resolve_is_a_no_op() {
        let table = Arc::new(PendingTable::new());
        let _waiter = table.register(key("a"), in_secs(5)).unwrap();
        assert!(table.resolve(&key("a")));
        assert!(!table.resolve(&key("a")));
        assert!(!table.resolve(&key("unknown")));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expires_and_removes_entry() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key("a"), in_secs(2)).unwrap();
        assert_eq!(waiter.wait().await, WaitOutcome::Expired);
        assert!(table.is_empty());
        assert!(!table.resolve(&key("a")));
    }

    #[tokio::test(start_paused = true)]
    async fn resolution_from_another_task_wakes_waiter() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key("a"), in_secs(10)).unwrap();

        let resolver = Arc::clone(&table);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert!(resolver.resolve(&key("a")));
        });

        assert_eq!(waiter.wait().await, WaitOutcome::Delivered);
    }

    #[tokio::test]
    async fn past_deadline_is_rejected_at_registration() {
        let table = Arc::new(PendingTable::new());
        let err = table.register(key("a"), Instant::now()).unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout { waited_ms: 0, .. }));
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn colliding_registration_is_rejected() {
        let table = Arc::new(PendingTable::new());
        let _first = table.register(key("a"), in_secs(5)).unwrap();
        let err = table.register(key("a"), in_secs(5)).unwrap_err();
        assert_eq!(err, ExecutionError::Collision { key: key("a") });
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn dropping_waiter_deregisters() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key("a"), in_secs(5)).unwrap();
        drop(waiter);
        assert!(table.is_empty());
        // The key is free again.
        let _again = table.register(key("a"), in_secs(5)).unwrap();
    }

    #[tokio::test]
    async fn stale_waiter_does_not_remove_newer_registration() {
        let table = Arc::new(PendingTable::new());
        let first = table.register(key("a"), in_secs(5)).unwrap();
        assert!(table.expire(&key("a")));
        let _second = table.register(key("a"), in_secs(5)).unwrap();

        first.abandon();
        assert!(table.contains(&key("a")));
    }

    #[tokio::test]
    async fn close_releases_waiters_and_refuses_new_ones() {
        let table = Arc::new(PendingTable::new());
        let a = table.register(key("a"), in_secs(60)).unwrap();
        let b = table.register(key("b"), in_secs(60)).unwrap();

        assert_eq!(table.close(), 2);
        assert_eq!(a.wait().await, WaitOutcome::Cancelled);
        assert_eq!(b.wait().await, WaitOutcome::Cancelled);
        assert!(table.is_closed());
        assert_eq!(
            table.register(key("c"), in_secs(60)).unwrap_err(),
            ExecutionError::ShuttingDown
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let table = Arc::new(PendingTable::new());
        let _short = table.register(key("short"), in_secs(1)).unwrap();
        let _long = table.register(key("long"), in_secs(60)).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(table.sweep_expired(Instant::now()), 1);
        assert!(table.contains(&key("long")));
        assert!(!table.contains(&key("short")));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancel() {
        let table = Arc::new(PendingTable::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&table).run_sweeper(Duration::from_millis(100), cancel.clone()));

        let waiter = table.register(key("a"), in_secs(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(table.is_empty());
        assert_eq!(waiter.wait().await, WaitOutcome::Expired);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn resolve_racing_the_deadline_agrees_with_the_waiter() {
        let table = Arc::new(PendingTable::new());
        for i in 0..500 {
            let k = key(&format!("edge-{i}"));
            let waiter = table.register(k.clone(), Instant::now() + Duration::from_micros(200)).unwrap();

            let resolver = Arc::clone(&table);
            let resolving = {
                let k = k.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(150)).await;
                    resolver.resolve(&k)
                })
            };
            let outcome = waiter.wait().await;
            let resolved = resolving.await.unwrap();

            assert_eq!(resolved, outcome == WaitOutcome::Delivered, "iteration {i}: {outcome:?}");
            assert!(!table.contains(&k));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolvers_fulfil_exactly_once() {
        let table = Arc::new(PendingTable::new());
        let waiter = table.register(key("race"), in_secs(10)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move { table.resolve(&key("race")) }));
        }
        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(waiter.wait().await, WaitOutcome::Delivered);
    }
}
