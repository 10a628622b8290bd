//! Connection handles and the events the scheduler feeds to the container.
//!
//! A [`Connection`] pairs a transport connection with the wrappers the
//! container created for it. The link table is the context slot that maps a
//! transport link to its [`Link`]; the delivery table does the same for
//! deliveries. Both tables belong to the connection, so tearing the
//! connection down releases every link wrapper it owns.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    config::ContainerConfig,
    context::{Context, ContextSlot, lock},
    delivery::Delivery,
    link::Link,
    metrics,
    scheduler::Scheduler,
    transport::{DeliveryKey, LinkKey, TransportConnection},
};

/// Identifier assigned to a connection by the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Which side initiated a connection or link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Accepted from a peer (listener side) / receiving link.
    Incoming,
    /// Initiated towards a peer (connector side) / sending link.
    Outgoing,
}

/// Event delivered by the scheduler for one connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    /// A listener accepted the connection.
    ListenerOpen,
    /// A connector established the connection.
    ConnectorOpen,
    /// The connection is being torn down.
    Close,
    /// The connection has protocol events or writable links to process.
    Process,
}

pub(crate) struct ConnectionInner {
    id: ConnectionId,
    transport: Arc<dyn TransportConnection>,
    scheduler: Arc<dyn Scheduler>,
    config: ContainerConfig,
    context: Option<Context>,
    link_context: ContextSlot,
    links: Mutex<HashMap<LinkKey, Arc<Link>>>,
    deliveries: Mutex<HashMap<DeliveryKey, Arc<Delivery>>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        let links = self
            .links
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        for _ in links.drain() {
            metrics::dec_links();
        }
    }
}

/// Cloneable handle to a connection driven by a container.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn new(
        id: ConnectionId,
        transport: Arc<dyn TransportConnection>,
        scheduler: Arc<dyn Scheduler>,
        config: ContainerConfig,
        context: Option<Context>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id,
                transport,
                scheduler,
                config,
                context,
                link_context: ContextSlot::default(),
                links: Mutex::new(HashMap::new()),
                deliveries: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<ConnectionInner>) -> Self { Self { inner } }

    pub(crate) fn downgrade(&self) -> Weak<ConnectionInner> { Arc::downgrade(&self.inner) }

    /// Scheduler-assigned identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.inner.id }

    /// The underlying transport connection.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportConnection> { &self.inner.transport }

    /// Context supplied when the connection was created.
    #[must_use]
    pub fn context(&self) -> Option<Context> { self.inner.context.clone() }

    /// Context supplied when the connection was created, downcast to `T`.
    #[must_use]
    pub fn context_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.context().and_then(|ctx| ctx.downcast::<T>().ok())
    }

    /// Per-connection context shared by every link on the connection.
    #[must_use]
    pub fn link_context(&self) -> Option<Context> { self.inner.link_context.get() }

    /// Replace the per-connection link context.
    pub fn set_link_context(&self, context: Option<Context>) {
        self.inner.link_context.set(context);
    }

    /// Ask the scheduler to process this connection again.
    pub fn activate(&self) { self.inner.scheduler.activate(self.inner.id); }

    /// Number of live link wrappers.
    #[must_use]
    pub fn link_count(&self) -> usize { lock(&self.inner.links).len() }

    /// Snapshot of the live link wrappers.
    #[must_use]
    pub fn links(&self) -> Vec<Arc<Link>> { lock(&self.inner.links).values().cloned().collect() }

    /// Number of transport deliveries currently bound to a wrapper.
    #[must_use]
    pub fn delivery_count(&self) -> usize { lock(&self.inner.deliveries).len() }

    pub(crate) fn config(&self) -> &ContainerConfig { &self.inner.config }

    pub(crate) fn link(&self, key: LinkKey) -> Option<Arc<Link>> {
        lock(&self.inner.links).get(&key).cloned()
    }

    pub(crate) fn insert_link(&self, link: Arc<Link>) {
        let previous = lock(&self.inner.links).insert(link.key(), link);
        if previous.is_none() {
            metrics::inc_links();
        }
    }

    pub(crate) fn remove_link(&self, key: LinkKey) -> Option<Arc<Link>> {
        let removed = lock(&self.inner.links).remove(&key);
        if removed.is_some() {
            metrics::dec_links();
        }
        removed
    }

    pub(crate) fn take_links(&self) -> Vec<Arc<Link>> {
        let drained: Vec<_> = lock(&self.inner.links).drain().map(|(_, l)| l).collect();
        for _ in &drained {
            metrics::dec_links();
        }
        drained
    }

    pub(crate) fn delivery(&self, key: DeliveryKey) -> Option<Arc<Delivery>> {
        lock(&self.inner.deliveries).get(&key).cloned()
    }

    pub(crate) fn remember_delivery(&self, key: DeliveryKey, delivery: Arc<Delivery>) {
        lock(&self.inner.deliveries).insert(key, delivery);
    }

    pub(crate) fn forget_delivery(&self, key: DeliveryKey) {
        lock(&self.inner.deliveries).remove(&key);
    }

    pub(crate) fn take_deliveries(&self) -> Vec<Arc<Delivery>> {
        lock(&self.inner.deliveries).drain().map(|(_, d)| d).collect()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("links", &self.link_count())
            .finish_non_exhaustive()
    }
}
