//! Process-wide device gate
//!
//! A binary semaphore: at most one session holds the device at a time.
//! Waiters are served in FIFO order (tokio's semaphore is fair).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace};

use fpgate_types::{LockHolder, SessionId};

use crate::error::{Error, Result};

/// Device lock
///
/// Cheap to clone; clones share the same gate.
#[derive(Debug, Clone)]
pub struct DeviceLock {
    inner: Arc<LockInner>,
}

#[derive(Debug)]
struct LockInner {
    semaphore: Arc<Semaphore>,

    /// Diagnostic only; the semaphore is the source of truth
    holder: parking_lot::Mutex<Option<LockHolder>>,
}

impl DeviceLock {
    /// Create an unheld lock
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                semaphore: Arc::new(Semaphore::new(1)),
                holder: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Wait until the device is free and take it.
    ///
    /// Dropping the returned future gives up the place in the queue.
    pub async fn acquire(&self, session: SessionId) -> Result<DeviceGuard> {
        trace!(session = %session, "Waiting for device lock");

        let permit = self
            .inner
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;

        Ok(self.grant(session, permit))
    }

    /// Like [`acquire`](Self::acquire), but give up with [`Error::Busy`]
    /// after `wait` when one is given.
    pub async fn acquire_within(
        &self,
        session: SessionId,
        wait: Option<Duration>,
    ) -> Result<DeviceGuard> {
        let Some(wait) = wait else {
            return self.acquire(session).await;
        };

        match tokio::time::timeout(wait, self.acquire(session)).await {
            Ok(guard) => guard,
            Err(_) => {
                debug!(session = %session, ?wait, "Device lock not granted in time");
                Err(Error::Busy { waited: wait })
            }
        }
    }

    /// Take the device only if nobody holds it right now
    pub fn try_acquire(&self, session: SessionId) -> Option<DeviceGuard> {
        let permit = self.inner.semaphore.clone().try_acquire_owned().ok()?;
        Some(self.grant(session, permit))
    }

    /// Check if some session holds the device
    pub fn is_held(&self) -> bool {
        self.inner.semaphore.available_permits() == 0
    }

    /// Current holder, if any
    pub fn holder(&self) -> Option<LockHolder> {
        self.inner.holder.lock().clone()
    }

    fn grant(&self, session: SessionId, permit: OwnedSemaphorePermit) -> DeviceGuard {
        *self.inner.holder.lock() = Some(LockHolder::new(session));

        debug!(session = %session, "Device lock acquired");

        DeviceGuard {
            session,
            lock: Arc::clone(&self.inner),
            _permit: permit,
        }
    }
}

impl Default for DeviceLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of exclusive device access
///
/// The lock is released exactly once, when the guard is dropped.
#[derive(Debug)]
pub struct DeviceGuard {
    session: SessionId,
    lock: Arc<LockInner>,
    // Dropped after `Drop::drop` runs, so the holder is cleared first
    _permit: OwnedSemaphorePermit,
}

impl DeviceGuard {
    /// Session owning this guard
    pub fn session(&self) -> SessionId {
        self.session
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        let mut holder = self.lock.holder.lock();
        if holder.as_ref().map(|h| h.session) == Some(self.session) {
            *holder = None;
        }

        debug!(session = %self.session, "Device lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sid(n: u64) -> SessionId {
        SessionId::new(n)
    }

    #[tokio::test]
    async fn test_lock_new() {
        let lock = DeviceLock::new();
        assert!(!lock.is_held());
        assert!(lock.holder().is_none());
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let lock = DeviceLock::new();

        let guard = lock.acquire(sid(1)).await.unwrap();
        assert!(lock.is_held());
        assert_eq!(lock.holder().unwrap().session, sid(1));
        assert_eq!(guard.session(), sid(1));

        drop(guard);
        assert!(!lock.is_held());
        assert!(lock.holder().is_none());
    }

    #[tokio::test]
    async fn test_try_acquire_when_held() {
        let lock = DeviceLock::new();

        let _guard = lock.try_acquire(sid(1)).unwrap();
        assert!(lock.try_acquire(sid(2)).is_none());
    }

    #[tokio::test]
    async fn test_clones_share_gate() {
        let lock = DeviceLock::new();
        let other = lock.clone();

        let _guard = lock.acquire(sid(1)).await.unwrap();
        assert!(other.is_held());
        assert!(other.try_acquire(sid(2)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_within_times_out() {
        let lock = DeviceLock::new();
        let _guard = lock.acquire(sid(1)).await.unwrap();

        let result = lock
            .acquire_within(sid(2), Some(Duration::from_millis(500)))
            .await;

        assert!(matches!(result, Err(Error::Busy { .. })));
        assert_eq!(lock.holder().unwrap().session, sid(1));
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let lock = DeviceLock::new();
        let guard = lock.acquire(sid(1)).await.unwrap();

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire(sid(2)).await.map(|g| g.session()) })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert_eq!(waiter.await.unwrap().unwrap(), sid(2));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_never_two_holders() {
        let lock = DeviceLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..16)
            .map(|n| {
                let lock = lock.clone();
                let inside = inside.clone();
                let peak = peak.clone();
                tokio::spawn(async move {
                    let _guard = lock.acquire(sid(n)).await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(!lock.is_held());
    }
}
