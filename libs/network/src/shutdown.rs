//! Shutdown signal shared by the cluster node's background loops

use tokio::sync::watch;

/// Receiving side; observes `true` once shutdown is requested.
pub type ShutdownSignal = watch::Receiver<bool>;

pub fn shutdown_channel() -> (watch::Sender<bool>, ShutdownSignal) {
    watch::channel(false)
}

/// Resolves once shutdown is requested or the sender is gone.
pub async fn shutdown_requested(signal: &mut ShutdownSignal) {
    loop {
        if *signal.borrow_and_update() {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
