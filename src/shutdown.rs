//! Cooperative cancellation
//!
//! A [`Shutdown`] is a level-triggered flag: once requested it stays requested.
//! Workers poll it before taking each task; the orchestrator awaits it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Shared shutdown request flag
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    requested: AtomicBool,
    notify: Notify,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.inner.requested.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Resolve once shutdown has been requested (immediately if it already was)
    pub async fn requested(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent `request` is not missed.
        notified.as_mut().enable();

        if self.is_requested() {
            return;
        }
        notified.await;
    }

    /// Request shutdown on the first Ctrl+C; exit with status 130 on the second
    pub fn listen_for_ctrl_c(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl+C: {}", e);
                return;
            }

            warn!("Interrupt received, not starting any more repositories (Ctrl+C again to force quit)");
            shutdown.request();

            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Second interrupt received, exiting");
                std::process::exit(130);
            }
        });
    }
}
