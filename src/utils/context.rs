//! Cooperative cancellation.
//!
//! A [`Context`] is a cloneable, one-shot cancellation signal. The service
//! owns one for the whole process and every subscription gets its own
//! request-scoped one; long-lived tasks `select!` over both.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Context {
    signal: Arc<watch::Sender<bool>>,
}

impl Context {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            signal: Arc::new(signal),
        }
    }

    /// Cancel this context and every clone of it. Idempotent.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }

    /// Resolves once the context is cancelled. Cancel-safe.
    pub async fn cancelled(&self) {
        let mut rx = self.signal.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
