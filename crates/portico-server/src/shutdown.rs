//! Shared shutdown coordination handles.
//!
//! Both handles are owned by the orchestrator and passed explicitly to every
//! server instance that must shut down as a group:
//!
//! - [`ShutdownSignal`] - the shared cancellation signal; triggering it asks
//!   every instance holding a clone to drain
//! - [`WaitGroup`] - the shared counter; each started instance adds one and
//!   removes it once its drain completed
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_server::{ShutdownSignal, WaitGroup};
//!
//! let signal = ShutdownSignal::with_os_signals();
//! let group = WaitGroup::new();
//!
//! // hand clones of both to every server, start them, then:
//! group.wait().await;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

/// A future that completes when the shutdown signal is triggered.
///
/// Created by [`ShutdownSignal::recv()`].
pub type ShutdownReceiver = WaitForCancellationFutureOwned;

/// A signal that can be used to trigger and await graceful shutdown.
///
/// Clones share state: triggering one clone notifies every waiter of every
/// clone.
///
/// # Example
///
/// ```rust
/// use portico_server::ShutdownSignal;
///
/// let shutdown = ShutdownSignal::new();
/// let shared = shutdown.clone();
///
/// shutdown.trigger();
/// assert!(shared.is_shutdown());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
}

impl ShutdownSignal {
    /// Creates a new, untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the signal. Idempotent.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    /// Returns `true` if the signal has been triggered.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a future that completes once the signal is triggered.
    ///
    /// Completes immediately if it already was.
    pub fn recv(&self) -> ShutdownReceiver {
        self.token.clone().cancelled_owned()
    }

    /// Creates a signal triggered by SIGTERM or SIGINT (Ctrl+C elsewhere).
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_os_signals() -> Self {
        let signal = Self::new();
        let signal_clone = signal.clone();

        tokio::spawn(async move {
            match wait_for_os_signal().await {
                Ok(()) => signal_clone.trigger(),
                Err(e) => tracing::error!(error = %e, "failed to listen for OS signals"),
            }
        });

        signal
    }
}

impl From<CancellationToken> for ShutdownSignal {
    /// Wraps a token owned by the orchestrator, so cancelling it shuts the
    /// group down.
    fn from(token: CancellationToken) -> Self {
        Self { token }
    }
}

async fn wait_for_os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        tracing::info!("received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}

/// A shared counter of active server instances.
///
/// An instance calls [`add`](Self::add) before starting its tasks and
/// [`done`](Self::done) after its drain completed. [`wait`](Self::wait)
/// resolves once the counter is back to zero.
///
/// # Example
///
/// ```rust
/// use portico_server::WaitGroup;
///
/// let group = WaitGroup::new();
/// group.add(2);
/// group.done();
/// assert_eq!(group.count(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WaitGroupInner>,
}

#[derive(Debug, Default)]
struct WaitGroupInner {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    /// Creates a counter starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `n` to the counter.
    pub fn add(&self, n: usize) {
        self.inner.count.fetch_add(n, Ordering::SeqCst);
    }

    /// Removes one from the counter, waking waiters when it reaches zero.
    ///
    /// Saturates at zero.
    pub fn done(&self) {
        let previous = self
            .inner
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match previous {
            Ok(1) => self.inner.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => tracing::warn!("wait group decremented below zero"),
        }
    }

    /// Returns the current value.
    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::SeqCst)
    }

    /// Waits until the counter is zero.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `done` is not missed
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}
