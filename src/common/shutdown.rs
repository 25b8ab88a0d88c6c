//! Shutdown coordinator for graceful termination of background tasks.

use tokio::sync::watch;

/// Broadcast-style shutdown signal.
///
/// Every background loop holds a clone and races `wait()` against its work;
/// `shutdown()` releases them all at once.
pub struct Shutdown {
    sender: watch::Sender<bool>,
    receiver: watch::Receiver<bool>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);

        Self {
            sender,
            receiver,
        }
    }

    /// Signal all waiters to terminate.
    pub fn shutdown(&self) {
        let _ = self.sender.send(true);
    }

    /// Wait until the shutdown signal fires.
    pub async fn wait(&self) {
        let mut receiver = self.receiver.clone();
        while !*receiver.borrow() {
            if receiver.changed().await.is_err() {
                break;
            }
        }
    }

    /// Check whether the signal has already fired.
    pub fn is_terminated(&self) -> bool {
        *self.receiver.borrow()
    }
}
