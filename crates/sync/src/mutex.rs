use crate::error::{ErrorKind, Result};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

type Waiters = VecDeque<oneshot::Sender<()>>;

/// A set of async mutexes, one per key, created on demand.
///
/// A key is held from the moment [`lock`](Self::lock) returns until the
/// matching [`unlock`](Self::unlock). There is no reentrancy: locking a key
/// the current task already holds waits forever. Ownership is handed directly
/// from the releasing holder to the oldest waiter, so waiters can't be
/// overtaken by a late `try_lock`.
///
/// ```
/// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
/// use kura_sync::MultiMutex;
///
/// let locks = MultiMutex::new();
/// locks.lock(1_i64).await;
/// locks.lock(2_i64).await;
/// locks.unlock(&1).unwrap();
/// assert_eq!(locks.size(), 1);
/// locks.unlock(&2).unwrap();
/// assert!(locks.is_empty());
/// # });
/// ```
pub struct MultiMutex<K> {
    // Held keys mapped to their waiters. Never held across an await.
    state: Mutex<HashMap<K, Waiters>>,
}

impl<K> Default for MultiMutex<K> {
    fn default() -> Self {
        Self { state: Mutex::new(HashMap::new()) }
    }
}

impl<K: Eq + Hash + Clone> MultiMutex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HashMap<K, Waiters>> {
        // The map is consistent after every statement, so a panic elsewhere
        // can't leave it half-updated.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Waits until `key` is free and marks it as held.
    ///
    /// Cancel safe: dropping the returned future before it completes removes
    /// it from the queue, and passes the key on if it had already been handed
    /// over.
    pub async fn lock(&self, key: K) {
        loop {
            let rx = {
                let mut state = self.state();
                match state.entry(key.clone()) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(VecDeque::new());
                        return;
                    },
                    Entry::Occupied(mut occupied) => {
                        let (tx, rx) = oneshot::channel();
                        occupied.get_mut().push_back(tx);
                        rx
                    },
                }
            };
            let mut pending = PendingLock { mutex: self, key: &key, rx, acquired: false };
            if (&mut pending.rx).await.is_ok() {
                pending.acquired = true;
                return;
            }
            // Sender dropped without a handover; queue up again.
        }
    }

    /// Marks `key` as held if it is currently free.
    pub fn try_lock(&self, key: K) -> bool {
        match self.state().entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(VecDeque::new());
                true
            },
            Entry::Occupied(_) => false,
        }
    }

    /// Like [`lock`](Self::lock), but releases the key when the returned guard
    /// is dropped.
    pub async fn lock_guard(&self, key: K) -> KeyGuard<'_, K> {
        self.lock(key.clone()).await;
        KeyGuard { mutex: self, key: Some(key) }
    }

    /// Releases `key`, handing it to the oldest waiter still interested.
    ///
    /// Returns [`NotHeld`](ErrorKind::NotHeld) if the key isn't locked.
    pub fn unlock(&self, key: &K) -> Result<()> {
        let mut state = self.state();
        let Some(waiters) = state.get_mut(key) else {
            tracing::error!("Attempted to unlock a key that is not locked");
            exn::bail!(ErrorKind::NotHeld);
        };
        while let Some(waiter) = waiters.pop_front() {
            if waiter.send(()).is_ok() {
                return Ok(());
            }
            // Waiter was cancelled; try the next one.
        }
        state.remove(key);
        Ok(())
    }

    pub fn is_locked(&self, key: &K) -> bool {
        self.state().contains_key(key)
    }

    /// Number of keys currently held.
    pub fn size(&self) -> usize {
        self.state().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().is_empty()
    }
}

/// Queue slot of a `lock` call that is still waiting.
struct PendingLock<'a, K: Eq + Hash + Clone> {
    mutex: &'a MultiMutex<K>,
    key: &'a K,
    rx: oneshot::Receiver<()>,
    acquired: bool,
}

impl<K: Eq + Hash + Clone> Drop for PendingLock<'_, K> {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        // After `close` no further handover can succeed, so `try_recv` tells
        // us for certain whether we became the holder.
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            tracing::debug!("Lock handed to a cancelled waiter; passing it on");
            if let Err(err) = self.mutex.unlock(self.key) {
                tracing::error!(error = %err, "Failed to pass on a cancelled lock");
            }
        }
    }
}

/// Holds a key of a [`MultiMutex`] until dropped.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    mutex: &'a MultiMutex<K>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone> KeyGuard<'_, K> {
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Releases the key now instead of on drop.
    pub fn unlock(mut self) -> Result<()> {
        match self.key.take() {
            Some(key) => self.mutex.unlock(&key),
            None => Ok(()),
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take()
            && let Err(err) = self.mutex.unlock(&key)
        {
            tracing::error!(error = %err, "Failed to release key guard");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{FutureExt, poll};
    use std::pin::pin;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_and_unlock_distinct_keys() {
        let mutex = MultiMutex::new();
        mutex.lock(1).await;
        mutex.lock(2).await;
        assert_eq!(mutex.size(), 2);
        mutex.unlock(&1).unwrap();
        assert_eq!(mutex.size(), 1);
        mutex.unlock(&2).unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test]
    async fn test_unlock_without_lock() {
        let mutex = MultiMutex::<i64>::new();
        let err = mutex.unlock(&42).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotHeld));
        // Double unlock is the same mistake.
        mutex.lock(42).await;
        mutex.unlock(&42).unwrap();
        assert!(mutex.unlock(&42).is_err());
    }

    #[tokio::test]
    async fn test_second_lock_waits() {
        let mutex = MultiMutex::new();
        mutex.lock("manga").await;
        let mut second = pin!(mutex.lock("manga"));
        assert!(poll!(second.as_mut()).is_pending());
        // Unrelated keys never contend.
        assert!(mutex.lock("other").now_or_never().is_some());
        mutex.unlock(&"manga").unwrap();
        assert!(poll!(second.as_mut()).is_ready());
        assert!(mutex.is_locked(&"manga"));
        mutex.unlock(&"manga").unwrap();
        mutex.unlock(&"other").unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let mutex = MultiMutex::new();
        mutex.lock(7).await;
        let mut first = pin!(mutex.lock(7));
        let mut second = pin!(mutex.lock(7));
        assert!(poll!(first.as_mut()).is_pending());
        assert!(poll!(second.as_mut()).is_pending());
        mutex.unlock(&7).unwrap();
        assert!(poll!(second.as_mut()).is_pending());
        assert!(poll!(first.as_mut()).is_ready());
        mutex.unlock(&7).unwrap();
        assert!(poll!(second.as_mut()).is_ready());
        mutex.unlock(&7).unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_is_skipped() {
        let mutex = MultiMutex::new();
        mutex.lock(1).await;
        let mut cancelled = Box::pin(mutex.lock(1));
        assert!(poll!(cancelled.as_mut()).is_pending());
        let mut next = pin!(mutex.lock(1));
        assert!(poll!(next.as_mut()).is_pending());
        drop(cancelled);
        mutex.unlock(&1).unwrap();
        assert!(poll!(next.as_mut()).is_ready());
        mutex.unlock(&1).unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_after_handover_passes_key_on() {
        let mutex = MultiMutex::new();
        mutex.lock(1).await;
        let mut cancelled = Box::pin(mutex.lock(1));
        assert!(poll!(cancelled.as_mut()).is_pending());
        // Ownership moves to `cancelled`, which is dropped without ever
        // observing it.
        mutex.unlock(&1).unwrap();
        assert!(mutex.is_locked(&1));
        drop(cancelled);
        assert!(!mutex.is_locked(&1));
        assert!(mutex.try_lock(1));
    }

    #[tokio::test]
    async fn test_aborted_task_does_not_leak_key() {
        let mutex = Arc::new(MultiMutex::new());
        mutex.lock(5).await;
        let task = tokio::spawn({
            let mutex = Arc::clone(&mutex);
            async move { mutex.lock(5).await }
        });
        tokio::task::yield_now().await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        mutex.unlock(&5).unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test]
    async fn test_try_lock_and_guard() {
        let mutex = MultiMutex::new();
        assert!(mutex.try_lock(3));
        assert!(!mutex.try_lock(3));
        mutex.unlock(&3).unwrap();
        {
            let guard = mutex.lock_guard(3).await;
            assert_eq!(guard.key(), Some(&3));
            assert!(mutex.is_locked(&3));
        }
        assert!(!mutex.is_locked(&3));
        let guard = mutex.lock_guard(3).await;
        guard.unlock().unwrap();
        assert!(mutex.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_under_contention() {
        let mutex = Arc::new(MultiMutex::new());
        let inside = Arc::new(AtomicBool::new(false));
        let done = Arc::new(AtomicUsize::new(0));
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let (mutex, inside, done) = (Arc::clone(&mutex), Arc::clone(&inside), Arc::clone(&done));
                tokio::spawn(async move {
                    let _guard = mutex.lock_guard(99_i64).await;
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders at once");
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.store(false, Ordering::SeqCst);
                    done.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(10), task).await.unwrap().unwrap();
        }
        assert_eq!(done.load(Ordering::SeqCst), 16);
        assert!(mutex.is_empty());
    }
}
