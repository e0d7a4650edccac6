//! Shared reader and per-session device leases

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fpgate_types::SessionId;

use crate::constants::DEFAULT_WORKERS;
use crate::error::{Error, Result};
use crate::lock::{DeviceGuard, DeviceLock};
use crate::offload::Offload;
use crate::scanner::{DriverResult, Scanner};

/// Device call policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Blocking workers for driver calls
    pub workers: usize,

    /// Upper bound for a single driver call; `None` waits forever
    pub call_timeout: Option<Duration>,

    /// Upper bound for waiting on the device lock; `None` queues forever
    pub lock_wait: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            call_timeout: None,
            lock_wait: None,
        }
    }
}

/// Shared fingerprint reader
///
/// Owns the driver, the device lock and the worker pool. Clone it freely;
/// clones refer to the same device.
///
/// # Examples
///
/// ```no_run
/// use fpgate_core::{Reader, ReaderConfig, SimulatedScanner};
///
/// # async fn run() -> fpgate_core::Result<()> {
/// let reader = Reader::new(SimulatedScanner::new(), ReaderConfig::default());
///
/// let session = reader.next_session_id();
/// let lease = reader.open(session).await?;
/// let user = lease.identify().await?;
/// lease.release().await;
///
/// println!("{}", user);
/// # Ok(())
/// # }
/// ```
pub struct Reader<S: Scanner> {
    inner: Arc<ReaderInner<S>>,
}

struct ReaderInner<S: Scanner> {
    scanner: Arc<S>,
    lock: DeviceLock,
    offload: Offload,
    config: ReaderConfig,
    next_session: AtomicU64,
}

impl<S: Scanner> Clone for Reader<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: Scanner> Reader<S> {
    /// Create a reader around `scanner`
    pub fn new(scanner: S, config: ReaderConfig) -> Self {
        Self::with_lock(scanner, config, DeviceLock::new())
    }

    /// Create a reader guarded by an existing lock
    pub fn with_lock(scanner: S, config: ReaderConfig, lock: DeviceLock) -> Self {
        Self {
            inner: Arc::new(ReaderInner {
                scanner: Arc::new(scanner),
                offload: Offload::new(config.workers),
                lock,
                config,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    pub fn scanner(&self) -> &S {
        &self.inner.scanner
    }

    pub fn lock(&self) -> &DeviceLock {
        &self.inner.lock
    }

    pub fn offload(&self) -> &Offload {
        &self.inner.offload
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.inner.config
    }

    /// Allocate a fresh session ID
    pub fn next_session_id(&self) -> SessionId {
        SessionId::new(self.inner.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Take the device lock (honouring `lock_wait`) and open the device
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The lock is not granted within `lock_wait`
    /// - The driver fails to initialize (the lock is released again)
    pub async fn open(&self, session: SessionId) -> Result<Lease<S>> {
        let guard = self
            .inner
            .lock
            .acquire_within(session, self.inner.config.lock_wait)
            .await?;

        self.open_with_guard(guard).await
    }

    /// Open the device under a lock the caller already holds
    pub async fn open_with_guard(&self, guard: DeviceGuard) -> Result<Lease<S>> {
        let session = guard.session();
        let scanner = Arc::clone(&self.inner.scanner);

        debug!(session = %session, "Initializing device");

        let handle = self.inner.offload.run(move || scanner.init()).await??;

        info!(session = %session, "Device opened");

        Ok(Lease {
            session,
            scanner: Arc::clone(&self.inner.scanner),
            offload: self.inner.offload.clone(),
            call_timeout: self.inner.config.call_timeout,
            handle: Arc::new(parking_lot::Mutex::new(Some(handle))),
            guard: Some(guard),
        })
    }
}

/// Exclusive, open device for the lifetime of one session
///
/// Holds the device lock and the driver handle. [`release`](Self::release)
/// closes the device and then frees the lock. A lease dropped without being
/// released (its future was cancelled, or it panicked) schedules the same
/// cleanup on the runtime.
pub struct Lease<S: Scanner> {
    session: SessionId,
    scanner: Arc<S>,
    offload: Offload,
    call_timeout: Option<Duration>,
    // Locked by the worker for the whole driver call; cleanup waits on it
    handle: Arc<parking_lot::Mutex<Option<S::Handle>>>,
    guard: Option<DeviceGuard>,
}

impl<S: Scanner> Lease<S> {
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// One identify call
    pub async fn identify(&self) -> Result<String> {
        self.call(|scanner, handle| scanner.identify(handle)).await
    }

    /// One enroll call
    pub async fn enroll(&self, username: &str, finger: fpgate_types::Finger) -> Result<()> {
        let username = username.to_string();
        self.call(move |scanner, handle| scanner.enroll(handle, &username, finger))
            .await
    }

    /// One verify call
    pub async fn verify(&self, username: &str) -> Result<bool> {
        let username = username.to_string();
        self.call(move |scanner, handle| scanner.verify(handle, &username))
            .await
    }

    /// Run a driver call on a worker, bounded by `call_timeout`.
    ///
    /// If this future is dropped or times out, the call keeps running and
    /// keeps the handle busy until it returns.
    async fn call<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&S, &mut S::Handle) -> DriverResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let scanner = Arc::clone(&self.scanner);
        let slot = Arc::clone(&self.handle);
        let session = self.session;

        let pending = self
            .offload
            .submit(move || -> Result<T> {
                let mut slot = slot.lock();
                let handle = slot.as_mut().ok_or_else(|| {
                    Error::InvalidSessionState(format!("device for {} already closed", session))
                })?;
                Ok(f(&*scanner, handle)?)
            })
            .await?;

        match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, pending).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(session = %session, ?limit, "Device call timed out; letting it drain");
                    Err(Error::Timeout { elapsed: limit })
                }
            },
            None => pending.await?,
        }
    }

    /// Close the device, then free the lock
    pub async fn release(mut self) {
        if let Some(guard) = self.guard.take() {
            dispose(
                Arc::clone(&self.scanner),
                self.offload.clone(),
                Arc::clone(&self.handle),
                guard,
            )
            .await;
        }
    }
}

impl<S: Scanner> Drop for Lease<S> {
    fn drop(&mut self) {
        let Some(guard) = self.guard.take() else {
            return;
        };

        warn!(session = %self.session, "Lease dropped without release; cleaning up");

        let scanner = Arc::clone(&self.scanner);
        let slot = Arc::clone(&self.handle);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(dispose(scanner, self.offload.clone(), slot, guard));
            }
            Err(_) => {
                if let Some(handle) = slot.lock().take() {
                    scanner.cleanup(handle);
                }
                drop(guard);
            }
        }
    }
}

async fn dispose<S: Scanner>(
    scanner: Arc<S>,
    offload: Offload,
    slot: Arc<parking_lot::Mutex<Option<S::Handle>>>,
    guard: DeviceGuard,
) {
    let session = guard.session();

    // Waits for any abandoned call still holding the handle
    let closed = offload
        .run(move || {
            if let Some(handle) = slot.lock().take() {
                scanner.cleanup(handle);
            }
        })
        .await;

    if let Err(e) = closed {
        warn!(session = %session, "Device cleanup failed: {}", e);
    }

    drop(guard);

    info!(session = %session, "Device closed");
}
