//! Connection event dispatch.
//!
//! The scheduler hands each connection event to [`Container::handle`]. A
//! [`ConnectionEvent::Process`] pass drains the connection's protocol event
//! queue, turning peer attaches, detaches and transfers into node hook
//! calls, then offers every fully active link a chance to write. Node hooks
//! always run with no lock held.

use std::sync::Arc;

use log::{debug, trace};

use crate::{
    connection::{Connection, ConnectionEvent, Direction},
    container::Container,
    link::Link,
    metrics,
    transport::{Disposition, Role, TransportDelivery, TransportEvent, TransportLink},
};

impl Container {
    /// Handle one scheduler event for `connection`.
    ///
    /// Returns the amount of work done, for the scheduler's fairness
    /// accounting. Only [`ConnectionEvent::Process`] reports non-zero work.
    pub fn handle(&self, connection: &Connection, event: ConnectionEvent) -> usize {
        match event {
            ConnectionEvent::ListenerOpen => {
                self.open_connection(connection, Direction::Incoming);
                0
            }
            ConnectionEvent::ConnectorOpen => {
                self.open_connection(connection, Direction::Outgoing);
                0
            }
            ConnectionEvent::Close => {
                self.close_connection(connection);
                0
            }
            ConnectionEvent::Process => self.process(connection),
        }
    }

    /// Open `connection` and announce it to every registered node type.
    ///
    /// Node types are visited in registration order. The lock is taken
    /// only to fetch each entry, so a slow hook does not stall other
    /// connections, and a type registered from inside a hook is still
    /// visited.
    pub fn open_connection(&self, connection: &Connection, direction: Direction) {
        connection.transport().open();
        let mut index = 0;
        while let Some(node_type) = self.node_type_at(index) {
            match direction {
                Direction::Incoming => node_type.on_inbound_connection_open(connection),
                Direction::Outgoing => node_type.on_outbound_connection_open(connection),
            }
            index += 1;
        }
        debug!(
            "connection opened: id={}, direction={direction:?}, node_types={index}",
            connection.id()
        );
    }

    /// Tear `connection` down.
    ///
    /// Every locally active link is reported to its node as orphaned
    /// (`closed == false`), closed and released. Remaining link wrappers are
    /// released without notification, every session is closed and finally
    /// the connection itself. Deliveries still bound to the connection lose
    /// their transport delivery but stay allocated until freed.
    pub fn close_connection(&self, connection: &Connection) {
        let transport = connection.transport();
        let mut orphaned = 0usize;
        for link in transport.links() {
            if !link.state().is_local_active() {
                continue;
            }
            if let Some(wrapper) = connection.link(link.key()) {
                notify_detach(&wrapper, false);
                orphaned += 1;
            }
            link.close();
            connection.remove_link(link.key());
        }
        let leftover = connection.take_links().len();
        for delivery in connection.take_deliveries() {
            delivery.orphan();
        }
        for session in transport.sessions() {
            session.close();
        }
        transport.close();
        debug!(
            "connection closed: id={}, orphaned_links={orphaned}, released_links={leftover}",
            connection.id()
        );
    }

    /// Drain the protocol events queued on `connection` and run one
    /// writable pass.
    ///
    /// Returns the number of events consumed plus the sum of the values
    /// returned by [`NodeType::on_writable`](crate::NodeType::on_writable).
    pub fn process(&self, connection: &Connection) -> usize {
        let transport = connection.transport();
        let mut events = 0;
        while let Some(event) = transport.peek_event() {
            events += 1;
            trace!("event: connection={}, event={event:?}", connection.id());
            self.dispatch_event(connection, event);
            transport.pop_event();
        }
        metrics::add_events(events);

        let mut work = events;
        if transport.state().is_fully_active() {
            for link in transport.links() {
                if !link.state().is_fully_active() || !link.session().state().is_fully_active() {
                    continue;
                }
                if let Some(wrapper) = connection.link(link.key()) {
                    work += wrapper
                        .node()
                        .node_type()
                        .on_writable(wrapper.node(), &wrapper);
                }
            }
        }
        work
    }

    fn dispatch_event(&self, connection: &Connection, event: TransportEvent) {
        match event {
            TransportEvent::ConnectionRemoteState => {
                let transport = connection.transport();
                let state = transport.state();
                if state.is_local_uninit() {
                    transport.open();
                } else if state.is_remote_closing() {
                    transport.close();
                }
            }
            TransportEvent::SessionRemoteState(session) => {
                let state = session.state();
                if state.is_local_uninit() {
                    session.set_incoming_capacity(connection.config().session_window);
                    session.open();
                } else if state.is_remote_closing() {
                    session.close();
                }
            }
            TransportEvent::LinkRemoteState(link) => {
                let state = link.state();
                if state.is_local_uninit() {
                    // Links created by `Link::open` already have a wrapper.
                    if connection.link(link.key()).is_none() {
                        self.attach(connection, link);
                    }
                } else if state.is_remote_closing() {
                    detach(connection, &link);
                }
            }
            TransportEvent::Delivery(delivery) => {
                if delivery.readable() {
                    self.receive(connection, &delivery);
                }
                if delivery.updated() {
                    updated(connection, &delivery);
                    delivery.clear();
                }
            }
            TransportEvent::Other => {}
        }
    }

    /// Bind a peer-attached link to the node its remote terminus names.
    fn attach(&self, connection: &Connection, link: Arc<dyn TransportLink>) {
        let role = link.role();
        let address = match role {
            Role::Sender => link.remote_source(),
            Role::Receiver => link.remote_target(),
        };
        let Some(node) = self.resolve(address.as_deref()) else {
            debug!(
                "attach refused: connection={}, link={}, address={address:?}",
                connection.id(),
                link.name()
            );
            link.close();
            metrics::inc_links_refused();
            return;
        };
        let wrapper = Arc::new(Link::attached(node, link, connection));
        connection.insert_link(Arc::clone(&wrapper));
        metrics::inc_links_attached();
        trace!(
            "link attached: connection={}, link={}, node={}",
            connection.id(),
            wrapper.transport().name(),
            wrapper.node().label()
        );
        let node = wrapper.node();
        match role {
            Role::Sender => node.node_type().on_outgoing(node, &wrapper),
            Role::Receiver => node.node_type().on_incoming(node, &wrapper),
        }
    }

    /// Hand a readable transfer to its link's node, or reject it.
    fn receive(&self, connection: &Connection, delivery: &Arc<dyn TransportDelivery>) {
        let link = delivery.link();
        let Some(wrapper) = connection.link(link.key()) else {
            reject(connection, &link, delivery);
            return;
        };
        let wrapped = match connection.delivery(delivery.key()) {
            Some(existing) => existing,
            None => {
                let created = self
                    .lock()
                    .insert_delivery(Arc::clone(&wrapper), Arc::clone(delivery));
                connection.remember_delivery(delivery.key(), Arc::clone(&created));
                created
            }
        };
        let node = wrapper.node();
        node.node_type().on_rx(node, &wrapper, &wrapped);
    }
}

/// Report the peer's detach to the node, close the link and release it.
fn detach(connection: &Connection, link: &Arc<dyn TransportLink>) {
    if let Some(wrapper) = connection.link(link.key()) {
        notify_detach(&wrapper, true);
    }
    link.close();
    connection.remove_link(link.key());
}

fn notify_detach(link: &Arc<Link>, closed: bool) {
    let node = link.node();
    node.node_type().on_link_detach(node, link, closed);
    metrics::inc_links_detached();
    trace!(
        "link detached: link={}, node={}, closed={closed}",
        link.transport().name(),
        node.label()
    );
}

fn updated(connection: &Connection, delivery: &Arc<dyn TransportDelivery>) {
    let Some(wrapped) = connection.delivery(delivery.key()) else {
        return;
    };
    let link = wrapped.link();
    let node = link.node();
    node.node_type().on_disposition(node, link, &wrapped);
}

/// Refuse a transfer nobody can route so the peer is not left waiting.
fn reject(
    connection: &Connection,
    link: &Arc<dyn TransportLink>,
    delivery: &Arc<dyn TransportDelivery>,
) {
    link.advance();
    link.flow(connection.config().reject_credit);
    delivery.update(Disposition::REJECTED);
    delivery.settle();
    metrics::inc_deliveries_rejected();
    debug!(
        "delivery rejected: connection={}, link={}, no node bound",
        connection.id(),
        link.name()
    );
}
