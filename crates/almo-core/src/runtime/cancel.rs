use std::sync::Arc;

use tokio::sync::watch;

/// Request-scoped abort flag shared by the driver, the disconnect monitor and
/// every sample task of one completion request.
///
/// Backed by a `watch` channel holding `false` until the first
/// [`cancel`](Self::cancel). The value never goes back to `false`, so late
/// subscribers observe the trip immediately.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Trip the token.
    ///
    /// Returns `true` only for the call that actually flipped the flag;
    /// repeated calls are no-ops and wake nobody.
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Raw receiver for engines that poll `*rx.borrow()` between tokens.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the token has been tripped.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
