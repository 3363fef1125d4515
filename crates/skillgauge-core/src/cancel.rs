//! Run cancellation signal.
//!
//! A [`CancelHandle`] flips a `watch` flag; every [`CancelSignal`] cloned
//! from the same pair observes it. Trials race their executor call against
//! [`CancelSignal::canceled`], so cancellation takes effect mid-call.

use std::sync::Arc;

use tokio::sync::watch;

/// Sending side: cancels the run it was created for.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side, cloned into every worker.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run is canceled; pending forever otherwise.
    pub async fn canceled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without canceling.
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::never()
    }
}

/// A connected handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (handle, signal) = cancel_pair();
        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.canceled().await }
        });
        assert!(!signal.is_canceled());
        handle.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_canceled());
        assert!(handle.is_canceled());
    }

    #[tokio::test]
    async fn test_never_stays_pending() {
        let signal = CancelSignal::never();
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.canceled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_canceled());
    }
}
