//! Cooperative cancellation
//!
//! A [`ShutdownTrigger`] owns a `watch` channel; every worker holds a cloned
//! [`Shutdown`] and selects on [`Shutdown::cancelled`] at its suspension
//! points.

use tokio::sync::watch;

/// Fires cancellation for every [`Shutdown`] cloned from it
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Cancellation token observed by workers
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, Shutdown { rx })
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// A token that is never cancelled
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // A dropped sender leaves the value at `false`.
        drop(tx);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation fires; pends forever if the trigger is
    /// dropped without firing.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_all_subscribers() {
        let (trigger, mut a) = ShutdownTrigger::new();
        let mut b = trigger.subscribe();
        assert!(!a.is_cancelled());

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), a.cancelled()).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), b.cancelled()).await.unwrap();
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn test_never_does_not_fire() {
        let mut never = Shutdown::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), never.cancelled()).await;
        assert!(fired.is_err());
    }
}
