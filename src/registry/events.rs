//! Lifecycle events published by the registry.
//!
//! Listeners are plain callbacks, invoked synchronously in registration
//! order. [`Listeners::channel`] adapts them into an unbounded mpsc stream for
//! async consumers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use tokio::sync::mpsc;

use crate::registry::client::ClientId;

/// A client lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A stream was admitted. `last_event_id` is the client's resumption token.
    Open {
        id: ClientId,
        last_event_id: Option<String>,
    },
    /// A stream ended normally.
    Close { id: ClientId, reason: CloseReason },
    /// A stream failed.
    Error { id: ClientId, error: String },
}

impl ClientEvent {
    /// Name of the event: `open`, `close` or `error`.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Open { .. } => "open",
            ClientEvent::Close { .. } => "close",
            ClientEvent::Error { .. } => "error",
        }
    }

    pub fn id(&self) -> &ClientId {
        match self {
            ClientEvent::Open { id, .. } | ClientEvent::Close { id, .. } | ClientEvent::Error { id, .. } => id,
        }
    }
}

/// Why a stream closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer went away before the stream was ended.
    ClientDisconnected,
    /// Every writer handle was dropped and the body drained.
    StreamEnded,
    /// `Registry::close` was called.
    ClosedByServer,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CloseReason::ClientDisconnected => "client disconnected",
            CloseReason::StreamEnded => "stream ended",
            CloseReason::ClosedByServer => "closed by server",
        };
        f.write_str(text)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Clone)]
enum Subscriber {
    Callback(Listener),
    Channel(mpsc::UnboundedSender<ClientEvent>),
}

impl Subscriber {
    /// A channel subscriber is gone once its receiver is dropped.
    fn is_live(&self) -> bool {
        match self {
            Subscriber::Callback(_) => true,
            Subscriber::Channel(tx) => !tx.is_closed(),
        }
    }

    fn deliver(&self, event: &ClientEvent) -> bool {
        match self {
            Subscriber::Callback(listener) => {
                listener(event);
                true
            }
            Subscriber::Channel(tx) => tx.send(event.clone()).is_ok(),
        }
    }
}

/// Ordered set of event listeners.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(ListenerId, Subscriber)>>,
}

impl Listeners {
    fn entries(&self) -> RwLockWriteGuard<'_, Vec<(ListenerId, Subscriber)>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, subscriber: Subscriber) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut entries = self.entries();
        entries.retain(|(_, existing)| existing.is_live());
        entries.push((id, subscriber));
        id
    }

    pub(crate) fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.push(Subscriber::Callback(Arc::new(listener)))
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|(existing, _)| *existing != id);
        entries.len() != before
    }

    /// A receiver fed with every event. Dropping it unsubscribes.
    pub(crate) fn channel(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push(Subscriber::Channel(tx));
        rx
    }

    /// Number of live subscribers. Dropped channels are pruned first.
    pub(crate) fn len(&self) -> usize {
        let mut entries = self.entries();
        entries.retain(|(_, subscriber)| subscriber.is_live());
        entries.len()
    }

    /// Deliver to a snapshot so listeners may call back into the registry.
    pub(crate) fn publish(&self, event: &ClientEvent) {
        let snapshot: Vec<Subscriber> = self
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(_, subscriber)| subscriber.clone())
            .collect();

        tracing::debug!(
            event = event.name(),
            client_id = %event.id(),
            listeners = snapshot.len(),
            "Publishing client event"
        );

        let mut stale = false;
        for subscriber in &snapshot {
            stale |= !subscriber.deliver(event);
        }
        if stale {
            self.entries().retain(|(_, subscriber)| subscriber.is_live());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn open(id: &str) -> ClientEvent {
        ClientEvent::Open {
            id: ClientId::from(id),
            last_event_id: None,
        }
    }

    #[test]
    fn delivers_in_registration_order() {
        let listeners = Listeners::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            listeners.add(move |_| seen.lock().unwrap().push(tag));
        }

        listeners.publish(&open("a"));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn removed_listener_stops_receiving() {
        let listeners = Listeners::default();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = listeners.add(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        listeners.publish(&open("a"));
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.publish(&open("b"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn channel_receives_clones() {
        let listeners = Listeners::default();
        let mut rx = listeners.channel();
        listeners.publish(&open("a"));
        assert_eq!(rx.try_recv().unwrap(), open("a"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_channels_unsubscribe() {
        let listeners = Listeners::default();
        for _ in 0..1000 {
            drop(listeners.channel());
        }
        assert_eq!(listeners.len(), 0);

        let kept = listeners.channel();
        let dropped = listeners.channel();
        drop(dropped);
        listeners.publish(&open("a"));
        assert_eq!(listeners.len(), 1);
        drop(kept);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn event_names() {
        let id = ClientId::from("x");
        assert_eq!(open("x").name(), "open");
        assert_eq!(
            ClientEvent::Close { id: id.clone(), reason: CloseReason::StreamEnded }.name(),
            "close"
        );
        assert_eq!(ClientEvent::Error { id, error: "boom".into() }.name(), "error");
    }
}
