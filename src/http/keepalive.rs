//! Keep-alive comments for idle streams.
//!
//! Intermediaries commonly drop connections that stay silent for a minute or
//! so. An SSE comment line carries no event, so clients ignore it.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};

use crate::lifecycle::shutdown::ShutdownSignal;
use crate::registry::Registry;

/// A bare SSE comment.
pub const KEEPALIVE_COMMENT: &[u8] = b":\n\n";

/// Write one keep-alive comment to every client. Returns how many accepted it.
pub fn ping_all(registry: &Registry) -> usize {
    registry
        .streams()
        .into_iter()
        .filter(|(client_id, stream)| match stream.write(KEEPALIVE_COMMENT) {
            Ok(()) => true,
            Err(err) => {
                tracing::trace!(client_id = %client_id, error = %err, "Keep-alive not delivered");
                false
            }
        })
        .count()
}

/// Ping every client each `interval` until shutdown.
pub async fn run(registry: Registry, interval: Duration, mut shutdown: ShutdownSignal) {
    tracing::info!(interval_secs = interval.as_secs(), "Keep-alive task starting");

    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; nobody needs a ping yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let delivered = ping_all(&registry);
                tracing::trace!(delivered, "Keep-alive sent");
            }
            _ = shutdown.recv() => {
                tracing::info!("Keep-alive task received shutdown signal, exiting loop");
                break;
            }
        }
    }
}
