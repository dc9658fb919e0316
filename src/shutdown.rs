//! Process-wide shutdown flag
//!
//! One trigger, many observers. Every blocking wait in the relay goes through
//! [`Shutdown::sleep`] so a pending backoff or cycle delay ends as soon as
//! shutdown is requested.

use std::time::Duration;
use tokio::sync::watch;

/// Owner side of the shutdown flag
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Observer side of the shutdown flag
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Create a connected trigger/observer pair
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    /// An observer whose flag can never be raised
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn requested(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Trigger dropped without firing: the flag can no longer change
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed and shutdown is still not
    /// requested, `false` otherwise.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_requested() {
            return false;
        }
        tokio::select! {
            _ = self.requested() => false,
            _ = tokio::time::sleep(duration) => !self.is_requested(),
        }
    }
}
