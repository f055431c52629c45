//! Client registry subsystem.
//!
//! # Data Flow
//! ```text
//! Gatekeeper accepts request
//!     → ClientStream::channel() (writer + response body)
//!     → Registry::admit (cap check, id allocation, hook attach)
//!     → ClientEvent::Open published
//!
//! Teardown (any of):
//!     Registry::close(id)            → Close { ClosedByServer }
//!     ClientStream::abort(detail)    → Error { detail }
//!     body finished / dropped        → Close { StreamEnded | ClientDisconnected }
//! ```
//!
//! # Design Decisions
//! - One mutex guards both the id map and the per-address counters, so the
//!   cap check and the insert are a single step
//! - Events are published only when a removal actually found the entry;
//!   this is what makes teardown exactly-once
//! - Listeners run outside every registry lock

pub mod client;
pub mod events;
pub mod stream;

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{AllowOrigin, SseConfig};
use crate::observability::metrics;

pub use client::{ClientId, IdSource, RandomIds, ID_BYTES};
pub use events::{ClientEvent, CloseReason, ListenerId};
pub use stream::{ClientBody, ClientStream, StreamError};

use client::Client;
use events::Listeners;
use stream::{Teardown, TeardownSink};

/// Upper bound on identifier draws before giving up on a registration.
pub const MAX_ID_ATTEMPTS: usize = 64;

/// Error type for registry admissions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The source address already holds `limit` open streams.
    #[error("connection limit of {limit} reached for {source_addr}")]
    AddressLimitReached { source_addr: IpAddr, limit: usize },

    /// Every identifier drawn collided with a registered one.
    #[error("no free client identifier after {0} attempts")]
    IdSpaceExhausted(usize),

    /// The stream was ended, aborted, or its peer went away before it could
    /// be registered.
    #[error("stream is already closed")]
    StreamClosed,

    /// The stream is already registered under another identifier.
    #[error("stream is already registered")]
    StreamAlreadyRegistered,
}

/// Result of [`Registry::close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The client was registered and has now been removed.
    Closed,
    /// No client with that identifier was registered.
    NotFound,
}

impl CloseOutcome {
    pub fn is_closed(self) -> bool {
        matches!(self, CloseOutcome::Closed)
    }
}

#[derive(Default)]
struct Clients {
    by_id: HashMap<ClientId, Client>,
    per_address: HashMap<IpAddr, usize>,
}

impl Clients {
    fn remove(&mut self, id: &ClientId) -> Option<Client> {
        let client = self.by_id.get(id)?;
        // Silence the stream before the entry goes away.
        client.stream.detach();
        let client = self.by_id.remove(id)?;

        if let Some(count) = self.per_address.get_mut(&client.source) {
            *count -= 1;
            if *count == 0 {
                self.per_address.remove(&client.source);
            }
        }
        Some(client)
    }
}

struct RegistryInner {
    config: SseConfig,
    clients: Mutex<Clients>,
    listeners: Listeners,
    ids: Box<dyn IdSource>,
}

impl RegistryInner {
    fn clients(&self) -> MutexGuard<'_, Clients> {
        self.clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take(&self, id: &ClientId) -> Option<Client> {
        let mut clients = self.clients();
        let removed = clients.remove(id);
        metrics::set_active_clients(clients.by_id.len());
        removed
    }
}

impl TeardownSink for RegistryInner {
    fn teardown(&self, id: &ClientId, signal: Teardown) {
        let Some(client) = self.take(id) else {
            return;
        };

        let event = match signal {
            Teardown::Close(reason) => {
                tracing::info!(client_id = %id, source = %client.source, %reason, "Client stream closed");
                metrics::record_teardown("close");
                ClientEvent::Close {
                    id: id.clone(),
                    reason,
                }
            }
            Teardown::Error(error) => {
                tracing::warn!(client_id = %id, source = %client.source, %error, "Client stream failed");
                metrics::record_teardown("error");
                ClientEvent::Error {
                    id: id.clone(),
                    error,
                }
            }
        };
        self.listeners.publish(&event);
    }
}

/// Registry of open SSE clients.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Create a registry drawing identifiers from the thread-local RNG.
    pub fn new(config: SseConfig) -> Self {
        Self::with_id_source(config, RandomIds)
    }

    /// Create a registry with a custom identifier source.
    pub fn with_id_source(config: SseConfig, ids: impl IdSource + 'static) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                clients: Mutex::new(Clients::default()),
                listeners: Listeners::default(),
                ids: Box::new(ids),
            }),
        }
    }

    /// Register a stream without applying the per-address cap.
    pub fn register(
        &self,
        stream: ClientStream,
        source: IpAddr,
        last_event_id: Option<String>,
    ) -> Result<ClientId, RegistryError> {
        self.insert(stream, source, last_event_id, None)
    }

    /// Register a stream if its source address is under the configured cap.
    ///
    /// The count and the insert happen under one lock, so concurrent
    /// admissions from the same address cannot overshoot the cap.
    pub fn admit(
        &self,
        stream: ClientStream,
        source: IpAddr,
        last_event_id: Option<String>,
    ) -> Result<ClientId, RegistryError> {
        self.insert(stream, source, last_event_id, self.inner.config.address_cap())
    }

    fn insert(
        &self,
        stream: ClientStream,
        source: IpAddr,
        last_event_id: Option<String>,
        cap: Option<usize>,
    ) -> Result<ClientId, RegistryError> {
        let id = {
            let mut clients = self.inner.clients();

            if let Some(limit) = cap {
                let open = clients.per_address.get(&source).copied().unwrap_or(0);
                if open + 1 > limit {
                    return Err(RegistryError::AddressLimitReached {
                        source_addr: source,
                        limit,
                    });
                }
            }

            let id = self.next_id(&clients)?;
            let sink: Arc<dyn TeardownSink> = self.inner.clone();
            if !stream.attach(Arc::downgrade(&sink), id.clone()) {
                return Err(RegistryError::StreamAlreadyRegistered);
            }
            // Checked after attaching: a body that goes away from here on
            // fires the hook, which waits on this lock and finds no entry.
            if stream.is_closed() {
                stream.detach();
                return Err(RegistryError::StreamClosed);
            }

            clients.by_id.insert(id.clone(), Client { stream, source });
            *clients.per_address.entry(source).or_insert(0) += 1;
            metrics::set_active_clients(clients.by_id.len());
            id
        };

        tracing::info!(client_id = %id, source = %source, last_event_id = ?last_event_id, "Client registered");
        self.inner.listeners.publish(&ClientEvent::Open {
            id: id.clone(),
            last_event_id,
        });
        Ok(id)
    }

    fn next_id(&self, clients: &Clients) -> Result<ClientId, RegistryError> {
        let mut buf = [0u8; ID_BYTES];
        for attempt in 1..=MAX_ID_ATTEMPTS {
            self.inner.ids.fill(&mut buf);
            let id = ClientId::from_bytes(&buf);
            if !clients.by_id.contains_key(&id) {
                return Ok(id);
            }
            tracing::debug!(attempt, "Client identifier collision, drawing again");
        }
        tracing::error!(attempts = MAX_ID_ATTEMPTS, "Client identifier space exhausted");
        Err(RegistryError::IdSpaceExhausted(MAX_ID_ATTEMPTS))
    }

    /// Close a client by identifier.
    ///
    /// Returns [`CloseOutcome::NotFound`] without publishing anything if the
    /// client is already gone, so racing teardowns notify once.
    pub fn close(&self, id: &ClientId) -> CloseOutcome {
        let Some(client) = self.inner.take(id) else {
            return CloseOutcome::NotFound;
        };

        client.stream.end();
        tracing::info!(client_id = %id, source = %client.source, "Client closed by server");
        metrics::record_teardown("close");
        self.inner.listeners.publish(&ClientEvent::Close {
            id: id.clone(),
            reason: CloseReason::ClosedByServer,
        });
        CloseOutcome::Closed
    }

    /// Close every registered client. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        self.client_ids()
            .iter()
            .filter(|id| self.close(id).is_closed())
            .count()
    }

    /// Subscribe to lifecycle events. Listeners run in registration order.
    ///
    /// The registry owns its listeners, so a listener that needs to call
    /// back into the registry should capture a [`WeakRegistry`] from
    /// [`downgrade`](Self::downgrade) rather than a clone.
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    /// Receive lifecycle events over an unbounded channel. Dropping the
    /// receiver unsubscribes it.
    pub fn events(&self) -> mpsc::UnboundedReceiver<ClientEvent> {
        self.inner.listeners.channel()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn allow_origin(&self) -> &AllowOrigin {
        &self.inner.config.allow_origin
    }

    pub fn limit_by_ip(&self) -> i64 {
        self.inner.config.limit_by_ip
    }

    pub fn path(&self) -> &str {
        &self.inner.config.path
    }

    pub fn with_credentials(&self) -> bool {
        self.inner.config.with_credentials
    }

    pub fn config(&self) -> &SseConfig {
        &self.inner.config
    }

    /// Identifiers of all registered clients, sorted.
    pub fn client_ids(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = self.inner.clients().by_id.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients().by_id.len()
    }

    /// Number of open streams from `source`.
    pub fn count_for_address(&self, source: IpAddr) -> usize {
        self.inner
            .clients()
            .per_address
            .get(&source)
            .copied()
            .unwrap_or(0)
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.inner.clients().by_id.contains_key(id)
    }

    /// A writer handle for one client.
    pub fn stream(&self, id: &ClientId) -> Option<ClientStream> {
        self.inner
            .clients()
            .by_id
            .get(id)
            .map(|client| client.stream.clone())
    }

    /// Snapshot of every client's writer handle, for broadcasting.
    pub fn streams(&self) -> Vec<(ClientId, ClientStream)> {
        self.inner
            .clients()
            .by_id
            .iter()
            .map(|(id, client)| (id.clone(), client.stream.clone()))
            .collect()
    }
}

impl Registry {
    /// A handle that does not keep the registry alive.
    pub fn downgrade(&self) -> WeakRegistry {
        WeakRegistry {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// Non-owning registry handle, for listeners that call back into the
/// registry.
#[derive(Clone)]
pub struct WeakRegistry {
    inner: Weak<RegistryInner>,
}

impl WeakRegistry {
    /// The registry, if any strong handle is still around.
    pub fn upgrade(&self) -> Option<Registry> {
        self.inner.upgrade().map(|inner| Registry { inner })
    }
}

impl std::fmt::Debug for WeakRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakRegistry")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.inner.config)
            .field("clients", &self.client_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOME: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const AWAY: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    /// Replays a fixed list of byte patterns, repeating the last one.
    struct Scripted {
        script: Vec<u8>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(script: &[u8]) -> Self {
            Self {
                script: script.to_vec(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl IdSource for Scripted {
        fn fill(&self, buf: &mut [u8]) {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let byte = self.script[call.min(self.script.len() - 1)];
            buf.fill(byte);
        }
    }

    fn config(limit: i64) -> SseConfig {
        SseConfig {
            limit_by_ip: limit,
            ..SseConfig::default()
        }
    }

    fn open(registry: &Registry, source: IpAddr) -> (ClientId, ClientStream, ClientBody) {
        let (stream, body) = ClientStream::channel();
        let id = registry.admit(stream.clone(), source, None).unwrap();
        (id, stream, body)
    }

    #[test]
    fn ids_are_unique_while_registered() {
        let registry = Registry::new(config(0));
        let mut bodies = Vec::new();
        for _ in 0..200 {
            let (_, _, body) = open(&registry, HOME);
            bodies.push(body);
        }
        let ids = registry.client_ids();
        let mut deduped = ids.clone();
        deduped.dedup();
        assert_eq!(ids.len(), 200);
        assert_eq!(deduped.len(), 200);
    }

    #[test]
    fn collision_draws_again() {
        let registry = Registry::with_id_source(config(0), Scripted::new(&[1, 1, 2]));
        let (first, _, _b1) = open(&registry, HOME);
        let (second, _, _b2) = open(&registry, HOME);

        assert_eq!(first, ClientId::from_bytes(&[1; ID_BYTES]));
        assert_eq!(second, ClientId::from_bytes(&[2; ID_BYTES]));
    }

    #[test]
    fn repeated_collisions_are_bounded() {
        let registry = Registry::with_id_source(config(0), Scripted::new(&[7]));
        let (_, _, _body) = open(&registry, HOME);

        let (stream, body) = ClientStream::channel();
        let err = registry.admit(stream, HOME, None).unwrap_err();
        assert_eq!(err, RegistryError::IdSpaceExhausted(MAX_ID_ATTEMPTS));
        assert_eq!(registry.client_count(), 1);

        // The rejected body was never attached, so dropping it is silent.
        drop(body);
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn closed_streams_are_not_registered() {
        let registry = Registry::new(config(1));
        let mut events = registry.events();

        let (disconnected, body) = ClientStream::channel();
        drop(body);
        assert_eq!(
            registry.register(disconnected, HOME, None),
            Err(RegistryError::StreamClosed)
        );

        let (ended, _body) = ClientStream::channel();
        ended.end();
        assert_eq!(
            registry.admit(ended, HOME, None),
            Err(RegistryError::StreamClosed)
        );

        assert_eq!(registry.client_count(), 0);
        assert_eq!(registry.count_for_address(HOME), 0);
        assert!(events.try_recv().is_err());

        // The cap slot is still free.
        let (id, _, _body) = open(&registry, HOME);
        assert!(registry.contains(&id));
    }

    #[test]
    fn stream_registers_under_one_id_only() {
        let registry = Registry::new(config(0));
        let mut events = registry.events();
        let (first, stream, body) = open(&registry, HOME);

        assert_eq!(
            registry.register(stream, AWAY, None),
            Err(RegistryError::StreamAlreadyRegistered)
        );
        assert_eq!(registry.client_count(), 1);
        assert_eq!(registry.count_for_address(AWAY), 0);

        drop(body);
        assert!(!registry.contains(&first));
        assert!(matches!(events.try_recv().unwrap(), ClientEvent::Open { .. }));
        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Close {
                id: first,
                reason: CloseReason::ClientDisconnected
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn open_event_carries_last_event_id() {
        let registry = Registry::new(config(0));
        let mut events = registry.events();
        let (stream, _body) = ClientStream::channel();

        let id = registry.register(stream, HOME, Some("42".into())).unwrap();

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Open {
                id,
                last_event_id: Some("42".into())
            }
        );
    }

    #[test]
    fn close_twice_notifies_once() {
        let registry = Registry::new(config(0));
        let (id, stream, _body) = open(&registry, HOME);
        let mut events = registry.events();

        assert_eq!(registry.close(&id), CloseOutcome::Closed);
        assert_eq!(registry.close(&id), CloseOutcome::NotFound);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Close {
                id: id.clone(),
                reason: CloseReason::ClosedByServer
            }
        );
        assert!(events.try_recv().is_err());
        assert!(stream.is_closed());
        assert!(!registry.contains(&id));
    }

    #[test]
    fn close_then_disconnect_notifies_once() {
        let registry = Registry::new(config(0));
        let (id, _stream, body) = open(&registry, HOME);
        let mut events = registry.events();

        registry.close(&id);
        drop(body);

        assert_eq!(events.try_recv().unwrap().name(), "close");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn disconnect_publishes_close() {
        let registry = Registry::new(config(0));
        let (id, _stream, body) = open(&registry, HOME);
        let mut events = registry.events();

        drop(body);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Close {
                id: id.clone(),
                reason: CloseReason::ClientDisconnected
            }
        );
        assert_eq!(registry.close(&id), CloseOutcome::NotFound);
        assert!(events.try_recv().is_err());
        assert_eq!(registry.count_for_address(HOME), 0);
    }

    #[test]
    fn abort_publishes_error_not_close() {
        let registry = Registry::new(config(0));
        let (id, stream, body) = open(&registry, HOME);
        let mut events = registry.events();

        stream.abort("connection reset by peer");
        drop(body);

        assert_eq!(
            events.try_recv().unwrap(),
            ClientEvent::Error {
                id,
                error: "connection reset by peer".into()
            }
        );
        assert!(events.try_recv().is_err());
        assert_eq!(registry.client_count(), 0);
    }

    #[test]
    fn per_address_cap() {
        let registry = Registry::new(config(1));
        let (first, _s, _b) = open(&registry, HOME);

        let (stream, _body) = ClientStream::channel();
        let err = registry.admit(stream, HOME, None).unwrap_err();
        assert_eq!(
            err,
            RegistryError::AddressLimitReached {
                source_addr: HOME,
                limit: 1
            }
        );

        // Other addresses are unaffected.
        let (_, _s2, _b2) = open(&registry, AWAY);

        registry.close(&first);
        let (_, _s3, _b3) = open(&registry, HOME);
        assert_eq!(registry.count_for_address(HOME), 1);
        assert_eq!(registry.count_for_address(AWAY), 1);
    }

    #[test]
    fn cap_below_one_is_disabled() {
        for limit in [0, -1] {
            let registry = Registry::new(config(limit));
            let mut bodies = Vec::new();
            for _ in 0..10 {
                bodies.push(open(&registry, HOME).2);
            }
            assert_eq!(registry.count_for_address(HOME), 10);
        }
    }

    #[test]
    fn register_ignores_cap() {
        let registry = Registry::new(config(1));
        let (_, _s, _b) = open(&registry, HOME);
        let (stream, _body) = ClientStream::channel();
        assert!(registry.register(stream, HOME, None).is_ok());
        assert_eq!(registry.count_for_address(HOME), 2);
    }

    #[test]
    fn replayed_operations_leave_exact_set() {
        let registry = Registry::new(config(0));
        let mut expected = Vec::new();
        let mut bodies = Vec::new();

        for round in 0..30 {
            let (id, stream, body) = open(&registry, HOME);
            match round % 3 {
                0 => {
                    assert!(registry.close(&id).is_closed());
                    bodies.push(body);
                }
                1 => drop(body),
                _ => {
                    expected.push(id);
                    bodies.push(body);
                }
            }
            drop(stream);
        }

        expected.sort();
        assert_eq!(registry.client_ids(), expected);
        assert_eq!(registry.count_for_address(HOME), expected.len());
    }

    #[test]
    fn close_all_closes_everything() {
        let registry = Registry::new(config(0));
        let mut events = registry.events();
        let _clients: Vec<_> = (0..3).map(|_| open(&registry, HOME)).collect();
        while events.try_recv().is_ok() {}

        assert_eq!(registry.close_all(), 3);
        assert_eq!(registry.client_count(), 0);
        for _ in 0..3 {
            assert_eq!(events.try_recv().unwrap().name(), "close");
        }
    }

    #[test]
    fn listeners_may_call_back_into_registry() {
        let registry = Registry::new(config(0));
        let handle = registry.downgrade();
        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        registry.subscribe(move |event| {
            if let (ClientEvent::Open { id, .. }, Some(registry)) = (event, handle.upgrade()) {
                // Close from inside the open notification.
                registry.close(id);
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        let (_, stream, _body) = open(&registry, HOME);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(registry.client_count(), 0);
        assert!(stream.is_closed());
    }

    #[test]
    fn weak_handle_does_not_keep_registry_alive() {
        let registry = Registry::new(config(0));
        let handle = registry.downgrade();
        registry.subscribe(move |_| {
            let _ = handle.upgrade();
        });
        let weak = registry.downgrade();
        let (_, stream, _body) = open(&registry, HOME);

        assert!(weak.upgrade().is_some());
        drop(registry);
        assert!(weak.upgrade().is_none());
        // The registry went away with the stream still open; writes still work.
        assert!(stream.write("x").is_ok());
    }

    #[test]
    fn dropped_event_receivers_unsubscribe() {
        let registry = Registry::new(config(0));
        for _ in 0..100 {
            drop(registry.events());
        }
        assert_eq!(registry.listener_count(), 0);

        let _events = registry.events();
        let (_, _, _body) = open(&registry, HOME);
        assert_eq!(registry.listener_count(), 1);
    }

    #[test]
    fn introspection_reflects_config() {
        let registry = Registry::new(SseConfig {
            path: "/events".into(),
            allow_origin: AllowOrigin::Any,
            limit_by_ip: 3,
            with_credentials: true,
            keepalive_secs: 0,
        });
        assert_eq!(registry.path(), "/events");
        assert_eq!(registry.allow_origin(), &AllowOrigin::Any);
        assert_eq!(registry.limit_by_ip(), 3);
        assert!(registry.with_credentials());
        assert!(registry.client_ids().is_empty());
    }
}
