//! Pause gate
//!
//! Temporary suppression window. `pause` flips the flag at once and schedules
//! the automatic resume; a newer pause supersedes the resume timer of an older
//! one. The flag is advisory: callers consult it before writing.

use errors::{AdsRxError, AdsRxResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    generation: AtomicU64,
    scope: CancellationToken,
}

/// Shared pause flag
#[derive(Debug, Clone)]
pub struct PauseGate {
    inner: Arc<Inner>,
}

impl PauseGate {
    /// Resume timers stop when `parent` is cancelled
    pub fn new(parent: &CancellationToken) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                tx,
                generation: AtomicU64::new(0),
                scope: parent.child_token(),
            }),
        }
    }

    /// Pause now and resume after `duration`
    ///
    /// Fails with `Disposed` after [`shutdown`](Self::shutdown) and with
    /// `Internal` outside a Tokio runtime; the flag is left untouched then.
    pub fn pause(&self, duration: Duration) -> AdsRxResult<()> {
        if self.inner.scope.is_cancelled() {
            return Err(AdsRxError::Disposed);
        }
        let runtime = Handle::try_current()
            .map_err(|e| AdsRxError::Internal(format!("pause needs a Tokio runtime: {}", e)))?;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.tx.send_replace(true);
        debug!("Paused for {:?}", duration);

        let inner = Arc::clone(&self.inner);
        runtime.spawn(async move {
            tokio::select! {
                _ = inner.scope.cancelled() => {},
                _ = tokio::time::sleep(duration) => {
                    if inner.generation.load(Ordering::SeqCst) == generation {
                        inner.tx.send_replace(false);
                        debug!("Resumed");
                    }
                },
            }
        });
        Ok(())
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Every pause and resume transition
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.tx.subscribe()
    }

    /// Resolves once the gate is open
    pub async fn wait_resumed(&self) {
        let mut rx = self.subscribe();
        // the sender lives as long as `self`
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    /// Stop pending resume timers; the flag keeps its current value
    pub fn shutdown(&self) {
        self.inner.scope.cancel();
    }
}
