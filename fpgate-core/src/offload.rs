//! Blocking call offload
//!
//! Driver calls block for seconds while the user presents a finger. They run
//! on tokio's blocking threads, bounded by a semaphore so that no more than
//! `workers` device calls are physically in flight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::error::{Error, Result};

/// Bounded worker pool for blocking driver calls
#[derive(Debug, Clone)]
pub struct Offload {
    permits: Arc<Semaphore>,
    workers: usize,
}

impl Offload {
    /// Create a pool with `workers` slots (at least one)
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);

        Self {
            permits: Arc::new(Semaphore::new(workers)),
            workers,
        }
    }

    /// Pool size
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Calls currently running on a worker
    pub fn in_flight(&self) -> usize {
        self.workers - self.permits.available_permits()
    }

    /// Hand `call` to a worker once one is free.
    ///
    /// The returned [`PendingCall`] may be dropped without awaiting it; the
    /// call then runs to completion and its result is discarded.
    pub async fn submit<F, T>(&self, call: F) -> Result<PendingCall<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| Error::Closed)?;

        trace!(in_flight = self.in_flight(), "Dispatching blocking call");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            call()
        });

        Ok(PendingCall { handle })
    }

    /// Run `call` on a worker and wait for its result
    pub async fn run<F, T>(&self, call: F) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        self.submit(call).await?.await
    }
}

/// Result of a dispatched blocking call
///
/// Resolves to [`Error::Worker`] if the call panicked.
#[derive(Debug)]
pub struct PendingCall<T> {
    handle: JoinHandle<T>,
}

impl<T> Future for PendingCall<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle).poll(cx).map(|joined| {
            joined.map_err(|e| {
                warn!("Blocking device call failed: {}", e);
                Error::Worker(e.to_string())
            })
        })
    }
}
