//! Shutdown coordination for the server.
//!
//! The HTTP server waits on one [`ShutdownSignal`] to close every open stream
//! and start draining; the keep-alive task waits on another to stop pinging.
//! The trigger is latched, so a task that subscribes after shutdown began
//! still sees it.

use std::sync::Arc;

use tokio::sync::watch;

/// Latched shutdown trigger shared by the signal handler and the server
/// tasks. Clones share the same state.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// A signal that resolves once [`trigger`](Self::trigger) is called,
    /// including when it was called before subscribing.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Signal every subscriber. Calling it again is harmless.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Number of tasks still listening.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the shutdown trigger.
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Wait until shutdown is triggered. Also returns if every [`Shutdown`]
    /// handle was dropped, since nothing can trigger it any more.
    pub async fn recv(&mut self) {
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }
}
