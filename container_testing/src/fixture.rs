//! One container connection wired to the in-memory engine.
//!
//! ```
//! use container_testing::Harness;
//!
//! let harness = Harness::default();
//! harness.open();
//! assert_eq!(harness.peer.pending_events(), 0);
//! ```

use std::sync::Arc;

use amqp_container::{
    ChannelScheduler,
    Connection,
    ConnectionEvent,
    ConnectionId,
    Container,
    ContainerConfig,
    Scheduler,
    scheduler::Activations,
    transport::{
        Role,
        memory::{MemoryConnection, MemoryLink, MemorySession},
    },
};
use rstest::fixture;

/// A container, one connection and the simulated peer behind it.
pub struct Harness {
    /// The container under test.
    pub container: Container,
    /// The simulated remote peer.
    pub peer: MemoryConnection,
    /// The container's view of the connection.
    pub connection: Connection,
    /// Scheduler the connection reports activations to.
    pub scheduler: Arc<ChannelScheduler>,
    /// Activations raised by the connection.
    pub activations: Activations,
}

impl Harness {
    /// Attach a fresh connection with id `id` to `container`.
    #[must_use]
    pub fn new(container: Container, id: u64) -> Self {
        let peer = MemoryConnection::new();
        let (scheduler, activations) = ChannelScheduler::channel();
        let connection = container.connection(
            ConnectionId::new(id),
            peer.transport(),
            Arc::clone(&scheduler) as Arc<dyn Scheduler>,
            None,
        );
        Self {
            container,
            peer,
            connection,
            scheduler,
            activations,
        }
    }

    /// Run one dispatch pass.
    pub fn process(&self) -> usize {
        self.container
            .handle(&self.connection, ConnectionEvent::Process)
    }

    /// Open the connection as if accepted by a listener, and let the peer
    /// answer.
    pub fn open(&self) -> usize {
        self.container
            .handle(&self.connection, ConnectionEvent::ListenerOpen);
        self.peer.remote_open();
        self.process()
    }

    /// Have the peer begin a session and let the container answer it.
    pub fn begin(&self) -> MemorySession {
        let session = self.peer.remote_begin();
        self.process();
        session
    }

    /// Have the peer attach a link and run a dispatch pass.
    ///
    /// `role` is the role of the container's end.
    pub fn attach(
        &self,
        session: &MemorySession,
        role: Role,
        name: &str,
        address: Option<&str>,
    ) -> MemoryLink {
        let (source, target) = match role {
            Role::Sender => (address, None),
            Role::Receiver => (None, address),
        };
        let link = self.peer.remote_attach(session, role, name, source, target);
        self.process();
        link
    }

    /// Tear the connection down.
    pub fn close(&self) { self.container.handle(&self.connection, ConnectionEvent::Close); }
}

impl Default for Harness {
    fn default() -> Self { Self::new(Container::new(ContainerConfig::default()), 1) }
}

/// A harness around an empty container.
#[fixture]
pub fn harness() -> Harness { Harness::default() }
