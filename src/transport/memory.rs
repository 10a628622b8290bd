//! Loopback protocol engine held entirely in memory.
//!
//! [`MemoryConnection`] implements the transport traits for the local side
//! and exposes a `remote_*` surface that plays the peer: each remote action
//! updates endpoint state and queues the event a real engine would raise.
//! Local actions taken by the container are observable through the
//! inspection accessors on [`MemoryLink`] and [`MemoryDelivery`].
//!
//! Every endpoint type is a cloneable handle around shared state, so the
//! same endpoint can be held by a test and by the container at once.
//!
//! ```
//! use amqp_container::transport::{Role, memory::MemoryConnection};
//!
//! let conn = MemoryConnection::new();
//! conn.remote_open();
//! let session = conn.remote_begin();
//! let link = conn.remote_attach(&session, Role::Sender, "out", Some("queue1"), None);
//! assert_eq!(conn.pending_events(), 3);
//! assert_eq!(link.remote_source_address().as_deref(), Some("queue1"));
//! ```

use std::{
    collections::VecDeque,
    sync::{
        Arc,
        Mutex,
        Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use super::{
    DeliveryKey,
    Disposition,
    EndpointState,
    LinkKey,
    Phase,
    Role,
    SessionKey,
    TransportConnection,
    TransportDelivery,
    TransportEvent,
    TransportLink,
    TransportSession,
};
use crate::context::lock;

#[derive(Default)]
struct Keys(AtomicU64);

impl Keys {
    fn next(&self) -> u64 { self.0.fetch_add(1, Ordering::Relaxed) + 1 }
}

struct ConnState {
    endpoint: EndpointState,
    events: VecDeque<TransportEvent>,
    sessions: Vec<MemorySession>,
    links: Vec<MemoryLink>,
    deliveries: Vec<MemoryDelivery>,
}

struct ConnShared {
    state: Mutex<ConnState>,
    keys: Arc<Keys>,
}

impl ConnShared {
    fn push(&self, event: TransportEvent) { lock(&self.state).events.push_back(event); }
}

/// In-memory connection endpoint with a simulated peer.
#[derive(Clone)]
pub struct MemoryConnection(Arc<ConnShared>);

impl Default for MemoryConnection {
    fn default() -> Self { Self::new() }
}

impl MemoryConnection {
    /// Create a connection with both sides uninitialised.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(ConnShared {
            state: Mutex::new(ConnState {
                endpoint: EndpointState::UNINIT,
                events: VecDeque::new(),
                sessions: Vec::new(),
                links: Vec::new(),
                deliveries: Vec::new(),
            }),
            keys: Arc::new(Keys::default()),
        }))
    }

    /// Return this connection as a shared transport handle.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn TransportConnection> { Arc::new(self.clone()) }

    /// Number of queued, unconsumed events.
    #[must_use]
    pub fn pending_events(&self) -> usize { lock(&self.0.state).events.len() }

    /// Look up a session by key.
    #[must_use]
    pub fn session_by_key(&self, key: SessionKey) -> Option<MemorySession> {
        lock(&self.0.state)
            .sessions
            .iter()
            .find(|s| s.0.key == key)
            .cloned()
    }

    /// Look up a link by key.
    #[must_use]
    pub fn link_by_key(&self, key: LinkKey) -> Option<MemoryLink> {
        lock(&self.0.state)
            .links
            .iter()
            .find(|l| l.0.key == key)
            .cloned()
    }

    /// Look up a delivery by key.
    #[must_use]
    pub fn delivery_by_key(&self, key: DeliveryKey) -> Option<MemoryDelivery> {
        lock(&self.0.state)
            .deliveries
            .iter()
            .find(|d| d.0.key == key)
            .cloned()
    }

    /// The peer opens the connection.
    pub fn remote_open(&self) { self.set_remote(Phase::Active); }

    /// The peer closes the connection.
    pub fn remote_close(&self) { self.set_remote(Phase::Closed); }

    fn set_remote(&self, phase: Phase) {
        let mut state = lock(&self.0.state);
        state.endpoint.remote = phase;
        state.events.push_back(TransportEvent::ConnectionRemoteState);
    }

    fn new_session(&self) -> MemorySession {
        let session = MemorySession(Arc::new(SessionShared {
            key: SessionKey::from(self.0.keys.next()),
            conn: Arc::downgrade(&self.0),
            keys: Arc::clone(&self.0.keys),
            state: Mutex::new(SessionState {
                endpoint: EndpointState::UNINIT,
                capacity: 0,
            }),
        }));
        lock(&self.0.state).sessions.push(session.clone());
        session
    }

    /// The peer begins a new session.
    pub fn remote_begin(&self) -> MemorySession {
        let session = self.new_session();
        self.remote_open_session(&session);
        session
    }

    /// The peer answers a session this side began.
    pub fn remote_open_session(&self, session: &MemorySession) {
        lock(&session.0.state).endpoint.remote = Phase::Active;
        self.0
            .push(TransportEvent::SessionRemoteState(Arc::new(session.clone())));
    }

    /// The peer ends a session.
    pub fn remote_end(&self, session: &MemorySession) {
        lock(&session.0.state).endpoint.remote = Phase::Closed;
        self.0
            .push(TransportEvent::SessionRemoteState(Arc::new(session.clone())));
    }

    /// The peer attaches a link on `session`.
    ///
    /// `role` is the role of the local end: a peer receiving from the
    /// container attaches a local [`Role::Sender`].
    pub fn remote_attach(
        &self,
        session: &MemorySession,
        role: Role,
        name: &str,
        source: Option<&str>,
        target: Option<&str>,
    ) -> MemoryLink {
        let link = session.new_link(name, role);
        {
            let mut state = lock(&link.0.state);
            state.remote_source = source.map(str::to_owned);
            state.remote_target = target.map(str::to_owned);
        }
        self.remote_open_link(&link);
        link
    }

    /// The peer answers an attach this side initiated.
    pub fn remote_open_link(&self, link: &MemoryLink) {
        lock(&link.0.state).endpoint.remote = Phase::Active;
        self.0
            .push(TransportEvent::LinkRemoteState(Arc::new(link.clone())));
    }

    /// The peer detaches a link.
    pub fn remote_detach(&self, link: &MemoryLink) {
        lock(&link.0.state).endpoint.remote = Phase::Closed;
        self.0
            .push(TransportEvent::LinkRemoteState(Arc::new(link.clone())));
    }

    /// The peer sets or clears the drain flag on a link.
    ///
    /// Queues a flow event, which the container consumes without acting on.
    pub fn set_remote_drain(&self, link: &MemoryLink, drain: bool) {
        lock(&link.0.state).drain = drain;
        self.0.push(TransportEvent::Other);
    }

    /// The peer sends a transfer on `link`.
    pub fn remote_transfer(&self, link: &MemoryLink, tag: &[u8]) -> MemoryDelivery {
        let delivery = link.new_delivery(tag);
        lock(&delivery.0.state).readable = true;
        self.0
            .push(TransportEvent::Delivery(Arc::new(delivery.clone())));
        delivery
    }

    /// The peer announces a disposition for `delivery`.
    pub fn remote_disposition(
        &self,
        delivery: &MemoryDelivery,
        disposition: Disposition,
        settled: bool,
    ) {
        {
            let mut state = lock(&delivery.0.state);
            state.remote = disposition;
            state.remote_settled = settled;
            state.updated = true;
        }
        self.0
            .push(TransportEvent::Delivery(Arc::new(delivery.clone())));
    }
}

impl TransportConnection for MemoryConnection {
    fn state(&self) -> EndpointState { lock(&self.0.state).endpoint }

    fn open(&self) { lock(&self.0.state).endpoint.local = Phase::Active; }

    fn close(&self) { lock(&self.0.state).endpoint.local = Phase::Closed; }

    fn peek_event(&self) -> Option<TransportEvent> { lock(&self.0.state).events.front().cloned() }

    fn pop_event(&self) { lock(&self.0.state).events.pop_front(); }

    fn sessions(&self) -> Vec<Arc<dyn TransportSession>> {
        lock(&self.0.state)
            .sessions
            .iter()
            .map(|s| Arc::new(s.clone()) as Arc<dyn TransportSession>)
            .collect()
    }

    fn links(&self) -> Vec<Arc<dyn TransportLink>> {
        lock(&self.0.state)
            .links
            .iter()
            .map(|l| Arc::new(l.clone()) as Arc<dyn TransportLink>)
            .collect()
    }

    fn session(&self) -> Arc<dyn TransportSession> { Arc::new(self.new_session()) }
}

struct SessionState {
    endpoint: EndpointState,
    capacity: usize,
}

struct SessionShared {
    key: SessionKey,
    conn: Weak<ConnShared>,
    keys: Arc<Keys>,
    state: Mutex<SessionState>,
}

/// In-memory session endpoint.
#[derive(Clone)]
pub struct MemorySession(Arc<SessionShared>);

impl MemorySession {
    /// Incoming window last set by the local side.
    #[must_use]
    pub fn incoming_capacity(&self) -> usize { lock(&self.0.state).capacity }

    fn new_link(&self, name: &str, role: Role) -> MemoryLink {
        let link = MemoryLink(Arc::new(LinkShared {
            key: LinkKey::from(self.0.keys.next()),
            name: name.to_owned(),
            role,
            session: self.clone(),
            state: Mutex::new(LinkState {
                endpoint: EndpointState::UNINIT,
                source: None,
                target: None,
                remote_source: None,
                remote_target: None,
                drain: false,
                credit: 0,
                current: None,
            }),
        }));
        if let Some(conn) = self.0.conn.upgrade() {
            lock(&conn.state).links.push(link.clone());
        }
        link
    }
}

impl TransportSession for MemorySession {
    fn key(&self) -> SessionKey { self.0.key }

    fn state(&self) -> EndpointState { lock(&self.0.state).endpoint }

    fn open(&self) { lock(&self.0.state).endpoint.local = Phase::Active; }

    fn close(&self) { lock(&self.0.state).endpoint.local = Phase::Closed; }

    fn set_incoming_capacity(&self, capacity: usize) { lock(&self.0.state).capacity = capacity; }

    fn sender(&self, name: &str) -> Arc<dyn TransportLink> {
        Arc::new(self.new_link(name, Role::Sender))
    }

    fn receiver(&self, name: &str) -> Arc<dyn TransportLink> {
        Arc::new(self.new_link(name, Role::Receiver))
    }
}

struct LinkState {
    endpoint: EndpointState,
    source: Option<String>,
    target: Option<String>,
    remote_source: Option<String>,
    remote_target: Option<String>,
    drain: bool,
    credit: u32,
    current: Option<Weak<DeliveryShared>>,
}

struct LinkShared {
    key: LinkKey,
    name: String,
    role: Role,
    session: MemorySession,
    state: Mutex<LinkState>,
}

/// In-memory link endpoint.
#[derive(Clone)]
pub struct MemoryLink(Arc<LinkShared>);

impl MemoryLink {
    /// Credit granted to the peer so far.
    #[must_use]
    pub fn credit(&self) -> u32 { lock(&self.0.state).credit }

    /// Source address announced by the peer.
    #[must_use]
    pub fn remote_source_address(&self) -> Option<String> {
        lock(&self.0.state).remote_source.clone()
    }

    /// The session carrying this link.
    #[must_use]
    pub fn memory_session(&self) -> MemorySession { self.0.session.clone() }

    fn new_delivery(&self, tag: &[u8]) -> MemoryDelivery {
        let delivery = MemoryDelivery(Arc::new(DeliveryShared {
            key: DeliveryKey::from(self.0.session.0.keys.next()),
            tag: tag.to_vec(),
            link: self.clone(),
            state: Mutex::new(DeliveryState::default()),
        }));
        if let Some(conn) = self.0.session.0.conn.upgrade() {
            lock(&conn.state).deliveries.push(delivery.clone());
        }
        let mut state = lock(&self.0.state);
        if state.current.as_ref().and_then(Weak::upgrade).is_none() {
            state.current = Some(Arc::downgrade(&delivery.0));
        }
        delivery
    }
}

impl TransportLink for MemoryLink {
    fn key(&self) -> LinkKey { self.0.key }

    fn name(&self) -> String { self.0.name.clone() }

    fn role(&self) -> Role { self.0.role }

    fn state(&self) -> EndpointState { lock(&self.0.state).endpoint }

    fn session(&self) -> Arc<dyn TransportSession> { Arc::new(self.0.session.clone()) }

    fn open(&self) { lock(&self.0.state).endpoint.local = Phase::Active; }

    fn close(&self) { lock(&self.0.state).endpoint.local = Phase::Closed; }

    fn source(&self) -> Option<String> { lock(&self.0.state).source.clone() }

    fn set_source(&self, address: Option<&str>) {
        lock(&self.0.state).source = address.map(str::to_owned);
    }

    fn target(&self) -> Option<String> { lock(&self.0.state).target.clone() }

    fn set_target(&self, address: Option<&str>) {
        lock(&self.0.state).target = address.map(str::to_owned);
    }

    fn remote_source(&self) -> Option<String> { lock(&self.0.state).remote_source.clone() }

    fn remote_target(&self) -> Option<String> { lock(&self.0.state).remote_target.clone() }

    fn drain(&self) -> bool { lock(&self.0.state).drain }

    fn advance(&self) -> bool {
        lock(&self.0.state)
            .current
            .take()
            .and_then(|weak| weak.upgrade())
            .is_some()
    }

    fn flow(&self, credit: u32) {
        let mut state = lock(&self.0.state);
        state.credit = state.credit.saturating_add(credit);
    }

    fn current(&self) -> Option<Arc<dyn TransportDelivery>> {
        let current = lock(&self.0.state).current.as_ref().and_then(Weak::upgrade)?;
        Some(Arc::new(MemoryDelivery(current)))
    }

    fn delivery(&self, tag: &[u8]) -> Option<Arc<dyn TransportDelivery>> {
        if self.state().local == Phase::Closed {
            return None;
        }
        Some(Arc::new(self.new_delivery(tag)))
    }
}

#[derive(Default)]
struct DeliveryState {
    readable: bool,
    updated: bool,
    local: Disposition,
    remote: Disposition,
    settled: bool,
    remote_settled: bool,
}

struct DeliveryShared {
    key: DeliveryKey,
    tag: Vec<u8>,
    link: MemoryLink,
    state: Mutex<DeliveryState>,
}

/// In-memory delivery.
#[derive(Clone)]
pub struct MemoryDelivery(Arc<DeliveryShared>);

impl MemoryDelivery {
    /// Disposition last applied by the local side.
    #[must_use]
    pub fn local_disposition(&self) -> Disposition { lock(&self.0.state).local }

    /// The local side has settled.
    #[must_use]
    pub fn is_settled(&self) -> bool { lock(&self.0.state).settled }

    /// The link carrying this delivery.
    #[must_use]
    pub fn memory_link(&self) -> MemoryLink { self.0.link.clone() }
}

impl TransportDelivery for MemoryDelivery {
    fn key(&self) -> DeliveryKey { self.0.key }

    fn link(&self) -> Arc<dyn TransportLink> { Arc::new(self.0.link.clone()) }

    fn tag(&self) -> Vec<u8> { self.0.tag.clone() }

    fn readable(&self) -> bool {
        let state = lock(&self.0.state);
        state.readable && !state.settled
    }

    fn updated(&self) -> bool { lock(&self.0.state).updated }

    fn clear(&self) { lock(&self.0.state).updated = false; }

    fn update(&self, disposition: Disposition) { lock(&self.0.state).local = disposition; }

    fn settle(&self) {
        lock(&self.0.state).settled = true;
        let mut link = lock(&self.0.link.0.state);
        let is_current = link
            .current
            .as_ref()
            .is_some_and(|current| current.ptr_eq(&Arc::downgrade(&self.0)));
        if is_current {
            link.current = None;
        }
    }

    fn remote_settled(&self) -> bool { lock(&self.0.state).remote_settled }

    fn remote_state(&self) -> Disposition { lock(&self.0.state).remote }
}
