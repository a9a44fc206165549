// Listener Shutdown Token

use crate::port::ListenerHandle;
use tokio::sync::watch;

/// Stop signal observed by a delivery loop
#[derive(Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// Check if a stop was requested
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the stop signal (returns at once if the sender is gone)
    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Stop sender held by whoever owns the delivery loop
pub struct ShutdownSender {
    tx: watch::Sender<bool>,
}

impl ShutdownSender {
    /// Signal every token cloned from this channel
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl ListenerHandle for ShutdownSender {
    fn stop(&self) {
        self.shutdown();
    }
}

/// Create a shutdown channel
pub fn shutdown_channel() -> (ShutdownSender, ShutdownToken) {
    let (tx, rx) = watch::channel(false);
    (ShutdownSender { tx }, ShutdownToken { rx })
}
