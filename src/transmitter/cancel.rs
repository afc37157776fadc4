//! Cooperative cancellation.

use tokio::sync::watch;

/// Owning side of a cancellation signal.
///
/// Dropping the handle also cancels every token derived from it, so a
/// generation whose handle is discarded can never keep workers alive.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

/// Observing side of a cancellation signal. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the signal fires or its handle is dropped.
    pub async fn cancelled(&mut self) {
        // Err means the handle is gone, which counts as cancelled.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}
