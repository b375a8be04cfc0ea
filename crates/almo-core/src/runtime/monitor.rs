//! Client-liveness polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::runtime::cancel::CancellationToken;

/// Answers "is the client still there?".
pub trait ConnectionProbe: Send + Sync + 'static {
    fn is_disconnected(&self) -> bool;
}

/// A streaming response's sender is disconnected once the transport has
/// dropped the receiving end.
impl<T: Send + 'static> ConnectionProbe for mpsc::UnboundedSender<T> {
    fn is_disconnected(&self) -> bool {
        self.is_closed()
    }
}

/// Create a liveness pair for non-streaming handlers.
///
/// The guard lives in the handler future; when the transport drops that
/// future the probe reports a disconnect.
pub fn connection_guard() -> (ConnectionGuard, GuardProbe) {
    let connected = Arc::new(AtomicBool::new(true));
    (
        ConnectionGuard {
            connected: Arc::clone(&connected),
        },
        GuardProbe { connected },
    )
}

#[derive(Debug)]
pub struct ConnectionGuard {
    connected: Arc<AtomicBool>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone)]
pub struct GuardProbe {
    connected: Arc<AtomicBool>,
}

impl ConnectionProbe for GuardProbe {
    fn is_disconnected(&self) -> bool {
        !self.connected.load(Ordering::Acquire)
    }
}

/// Background poller that trips the request token when the client leaves.
///
/// Stops on its own after tripping or once the token is cancelled by someone
/// else. The driver must call [`stop`](Self::stop) before returning so no
/// poller outlives its request.
#[derive(Debug)]
pub struct DisconnectMonitor {
    handle: JoinHandle<()>,
}

impl DisconnectMonitor {
    pub fn spawn<P: ConnectionProbe>(
        probe: P,
        cancel: CancellationToken,
        interval: Duration,
        request_id: String,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if probe.is_disconnected() {
                            if cancel.cancel() {
                                info!(request_id = %request_id, "client disconnected; cancelling generation");
                            }
                            break;
                        }
                    }
                }
            }
            debug!(request_id = %request_id, "disconnect monitor exited");
        });
        Self { handle }
    }

    /// Stop polling and wait for the poller to exit.
    pub async fn stop(self) {
        self.handle.abort();
        let _ = self.handle.await;
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
