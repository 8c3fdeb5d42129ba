//! Gateway stop and shutdown signals

use tokio::sync::watch;

/// Cloneable control handle for a running [`Gateway`](super::Gateway)
///
/// `stop` ends the accept loop and leaves live sessions alone; `shutdown`
/// additionally asks every session to deregister and close.
#[derive(Debug, Clone)]
pub struct GatewayHandle {
    stop: watch::Sender<bool>,
    shutdown: watch::Sender<bool>,
}

impl GatewayHandle {
    pub(crate) fn new() -> Self {
        let (stop, _) = watch::channel(false);
        let (shutdown, _) = watch::channel(false);
        Self { stop, shutdown }
    }

    /// Stop accepting new connections
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Stop accepting and end every live session
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
        self.shutdown.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}

/// Resolve once `rx` reads `true`
///
/// A dropped sender is not a signal; the future then never resolves.
pub(crate) async fn signalled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|raised| *raised).await.is_err() {
        std::future::pending::<()>().await;
    }
}
