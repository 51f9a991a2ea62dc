//! Single-resolution result channels.
//!
//! Every grid and store call made by the provider finishes through a
//! [`Completer`]: a success and a failure callback share one slot, the first to
//! fire resolves the caller's [`Pending`] handle and any later call is a no-op.
//! Work that must never affect the caller's result goes through
//! [`best_effort`] instead.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::{DataError, Result};

/// Write side of a single-resolution channel.
pub struct Completer<T> {
    slot: Arc<Mutex<Option<oneshot::Sender<Result<T>>>>>,
}

// Manual Clone implementation that doesn't require T: Clone
impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> Completer<T> {
    /// Resolve the channel. Returns `false` if it was already resolved.
    pub fn complete(&self, result: Result<T>) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        // The receiver may be gone; the channel still counts as resolved.
        let _ = tx.send(result);
        true
    }

    pub fn succeed(&self, value: T) -> bool {
        self.complete(Ok(value))
    }

    pub fn fail(&self, error: DataError) -> bool {
        self.complete(Err(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.lock().is_none()
    }
}

impl<T: Send + 'static> Completer<T> {
    /// Split into a success and a failure callback sharing this channel.
    pub fn callbacks(
        self,
    ) -> (
        impl FnOnce(T) -> bool + Send + 'static,
        impl FnOnce(DataError) -> bool + Send + 'static,
    ) {
        let on_failure = self.clone();
        (
            move |value: T| self.succeed(value),
            move |error: DataError| on_failure.fail(error),
        )
    }
}

/// Read side of a single-resolution channel.
///
/// Resolves with [`DataError::Abandoned`] if every completer is dropped
/// without resolving.
pub struct Pending<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(DataError::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for Pending<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending").finish_non_exhaustive()
    }
}

/// Create a new single-resolution channel.
pub fn channel<T>() -> (Completer<T>, Pending<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completer {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Pending { rx },
    )
}

/// Run `fut` on the worker pool and deliver its outcome through a fresh channel.
pub fn spawn_on<T, F>(handle: &Handle, fut: F) -> Pending<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let (completer, pending) = channel();
    let (on_success, on_failure) = completer.callbacks();

    handle.spawn(async move {
        match fut.await {
            Ok(value) => on_success(value),
            Err(error) => on_failure(error),
        };
    });

    pending
}

/// Run a detached task whose failure is only logged.
pub fn best_effort<F>(handle: &Handle, what: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    handle.spawn(async move {
        if let Err(e) = fut.await {
            warn!("Best-effort {} failed: {:#}", what, e);
        }
    })
}
