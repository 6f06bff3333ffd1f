//! Per-action execution context handed to providers.

use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::security::SecurityManager;

/// Cooperative cancellation signal. Providers must poll [`is_cancelled`] or
/// await [`cancelled`] at I/O boundaries; cancellation is idempotent.
///
/// [`is_cancelled`]: CancelSignal::is_cancelled
/// [`cancelled`]: CancelSignal::cancelled
#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

/// The cancelling side, held by the executor.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Idempotent; receivers observe the final value.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                // Sender dropped without cancelling; never resolves.
                std::future::pending::<()>().await;
            }
            if *rx.borrow() {
                return;
            }
        }
    }
}

/// Read-only context for one dispatch. Providers must not retain it past
/// the call.
#[derive(Clone)]
pub struct ExecutionContext {
    pub plan_id: String,
    pub action_id: String,
    /// Results of already-completed actions in the same plan.
    pub previous_results: Arc<HashMap<String, Value>>,
    pub working_directory: PathBuf,
    pub security: Arc<SecurityManager>,
    pub cancel: CancelSignal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_observed_and_idempotent() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(signal.is_cancelled());
        // An already-cancelled signal resolves immediately.
        tokio::time::timeout(std::time::Duration::from_millis(50), signal.cancelled())
            .await
            .expect("cancelled() must resolve");
    }
}
