// Watcher Stop Token

use tokio::sync::watch;

/// Stop signal for one watcher (or, cloned, for all of them at shutdown)
#[derive(Clone)]
pub struct StopToken {
    rx: watch::Receiver<bool>,
}

impl StopToken {
    /// Check if a stop was requested
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait for the stop signal
    ///
    /// Also resolves when the sender is dropped, so an orphaned watcher exits.
    pub async fn wait(&mut self) {
        while !*self.rx.borrow_and_update() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Stop sender, held by the registry entry
pub struct StopSender {
    tx: watch::Sender<bool>,
}

impl StopSender {
    /// Signal the watcher to stop after its current cycle
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// Create a stop channel
pub fn stop_channel() -> (StopSender, StopToken) {
    let (tx, rx) = watch::channel(false);
    (StopSender { tx }, StopToken { rx })
}
