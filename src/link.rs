//! Link wrappers binding a transport link to a node.

use std::sync::{
    Arc,
    Weak,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    connection::{Connection, ConnectionInner, Direction},
    context::{Context, ContextSlot},
    delivery::Delivery,
    error::{ContainerError, Result},
    node::Node,
    transport::{LinkKey, Role, TransportLink, TransportSession},
};

/// Outcome of [`Link::drain_changed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrainChange {
    /// The peer's drain flag differs from the last observed value.
    pub changed: bool,
    /// The peer's current drain flag.
    pub drain: bool,
}

/// One attachment between a connection and a [`Node`].
///
/// Links are bidirectional as far as the container is concerned: the role
/// only decides which attach hook runs and which remote terminus is used to
/// find the node.
pub struct Link {
    key: LinkKey,
    transport: Arc<dyn TransportLink>,
    node: Arc<Node>,
    connection: Weak<ConnectionInner>,
    drain_mode: AtomicBool,
    context: ContextSlot,
}

impl Link {
    /// Wrap a link the peer attached.
    pub(crate) fn attached(
        node: Arc<Node>,
        transport: Arc<dyn TransportLink>,
        connection: &Connection,
    ) -> Self {
        Self {
            key: transport.key(),
            drain_mode: AtomicBool::new(transport.drain()),
            transport,
            node,
            connection: connection.downgrade(),
            context: ContextSlot::default(),
        }
    }

    /// Open a link from this side of `connection`, bound to `node`.
    ///
    /// A new session is created with the container's session window and
    /// opened; the link itself is left for the caller to configure and open.
    /// [`Direction::Outgoing`] creates a sender, [`Direction::Incoming`] a
    /// receiver. The link's context starts out as the node's context.
    #[must_use]
    pub fn open(
        node: &Arc<Node>,
        connection: &Connection,
        direction: Direction,
        name: &str,
    ) -> Arc<Self> {
        let session = connection.transport().session();
        session.set_incoming_capacity(connection.config().session_window);
        let transport = match direction {
            Direction::Outgoing => session.sender(name),
            Direction::Incoming => session.receiver(name),
        };
        let link = Arc::new(Self {
            key: transport.key(),
            drain_mode: AtomicBool::new(transport.drain()),
            transport,
            node: Arc::clone(node),
            connection: connection.downgrade(),
            context: ContextSlot::new(node.context()),
        });
        connection.insert_link(Arc::clone(&link));
        session.open();
        link
    }

    /// Engine-assigned identity of the underlying transport link.
    #[must_use]
    pub fn key(&self) -> LinkKey { self.key }

    /// The underlying transport link.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportLink> { &self.transport }

    /// Session carrying the link.
    #[must_use]
    pub fn session(&self) -> Arc<dyn TransportSession> { self.transport.session() }

    /// Role of this end of the link.
    #[must_use]
    pub fn role(&self) -> Role { self.transport.role() }

    /// The node this link is bound to.
    #[must_use]
    pub fn node(&self) -> &Arc<Node> { &self.node }

    /// The owning connection, unless it has been dropped.
    #[must_use]
    pub fn connection(&self) -> Option<Connection> {
        self.connection.upgrade().map(Connection::from_inner)
    }

    /// The link's handler context.
    #[must_use]
    pub fn context(&self) -> Option<Context> { self.context.get() }

    /// The link's handler context downcast to `T`.
    #[must_use]
    pub fn context_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.context.get_as()
    }

    /// Replace the link's handler context.
    pub fn set_context(&self, context: Option<Context>) { self.context.set(context); }

    /// Context shared by every link on the owning connection.
    #[must_use]
    pub fn conn_context(&self) -> Option<Context> {
        self.connection().and_then(|conn| conn.link_context())
    }

    /// Replace the context shared by every link on the owning connection.
    ///
    /// Does nothing once the connection has been dropped.
    pub fn set_conn_context(&self, context: Option<Context>) {
        if let Some(conn) = self.connection() {
            conn.set_link_context(context);
        }
    }

    /// Local source address.
    #[must_use]
    pub fn source(&self) -> Option<String> { self.transport.source() }

    /// Local target address.
    #[must_use]
    pub fn target(&self) -> Option<String> { self.transport.target() }

    /// Source address announced by the peer.
    #[must_use]
    pub fn remote_source(&self) -> Option<String> { self.transport.remote_source() }

    /// Target address announced by the peer.
    #[must_use]
    pub fn remote_target(&self) -> Option<String> { self.transport.remote_target() }

    /// Close the transport link locally.
    pub fn close(&self) { self.transport.close(); }

    /// Release this wrapper from its connection.
    ///
    /// The transport link is untouched; call [`close`](Self::close) first
    /// to detach it.
    pub fn free(&self) {
        if let Some(conn) = self.connection() {
            conn.remove_link(self.key);
        }
    }

    /// Poll the peer's drain flag.
    ///
    /// Compares the live flag with the value cached at attach time or at
    /// the previous poll, and caches the live value when it changed.
    pub fn drain_changed(&self) -> DrainChange {
        let drain = self.transport.drain();
        let previous = self.drain_mode.swap(drain, Ordering::AcqRel);
        DrainChange {
            changed: previous != drain,
            drain,
        }
    }

    /// Returns `true` if the link, its session and its connection are all
    /// open on both sides.
    #[must_use]
    pub fn is_fully_active(&self) -> bool {
        self.connection()
            .is_some_and(|conn| self.is_fully_active_on(&conn))
    }

    pub(crate) fn is_fully_active_on(&self, connection: &Connection) -> bool {
        self.transport.state().is_fully_active()
            && self.transport.session().state().is_fully_active()
            && connection.transport().state().is_fully_active()
    }

    /// Request a dispatch pass for the owning connection.
    ///
    /// Nothing happens unless the link, its session and its connection are
    /// all fully active, since a pass could not make progress otherwise.
    pub fn activate(&self) {
        if let Some(conn) = self.connection() {
            if self.is_fully_active_on(&conn) {
                conn.activate();
            }
        }
    }

    /// Start a new outbound delivery tagged `tag`.
    ///
    /// Locks the container for the duration of the call. Routing code that
    /// already holds a [`ContainerGuard`](crate::ContainerGuard) uses
    /// [`ContainerGuard::deliver`](crate::ContainerGuard::deliver) instead.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ContainerDropped`] if the owning container
    /// is gone, otherwise as [`ContainerGuard::deliver`](crate::ContainerGuard::deliver).
    ///
    /// # Panics
    ///
    /// Panics if the link already has a current delivery.
    pub fn deliver(self: &Arc<Self>, tag: &[u8]) -> Result<Arc<Delivery>> {
        let container = self
            .node
            .container()
            .ok_or(ContainerError::ContainerDropped)?;
        container.lock().deliver(self, tag)
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("key", &self.key)
            .field("name", &self.transport.name())
            .field("node", &self.node.name())
            .finish_non_exhaustive()
    }
}
