//! A node type that records every hook the container invokes.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use amqp_container::{Connection, ConnectionId, Delivery, DeliveryId, Link, Node, NodeType};

/// One recorded hook invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    /// `on_incoming` for the named link and node.
    Incoming { link: String, node: Option<String> },
    /// `on_outgoing` for the named link and node.
    Outgoing { link: String, node: Option<String> },
    /// `on_writable` for the named link.
    Writable { link: String },
    /// `on_rx` for a delivery on the named link.
    Rx { link: String, delivery: DeliveryId },
    /// `on_disposition` for a delivery on the named link.
    Disposition { link: String, delivery: DeliveryId },
    /// `on_link_detach` for the named link.
    Detach { link: String, closed: bool },
    /// `on_inbound_connection_open`.
    InboundOpen(ConnectionId),
    /// `on_outbound_connection_open`.
    OutboundOpen(ConnectionId),
}

type RxHook = Box<dyn Fn(&Arc<Node>, &Arc<Link>, &Arc<Delivery>) + Send + Sync>;

/// Node type recording its hook calls in order.
///
/// By default attach hooks open the link so it becomes fully active once
/// the peer has attached, and `on_writable` reports no work.
pub struct RecordingNodeType {
    name: String,
    calls: Mutex<Vec<Call>>,
    open_on_attach: AtomicBool,
    writable_work: AtomicUsize,
    rx_hook: Mutex<Option<RxHook>>,
}

impl RecordingNodeType {
    /// Create a recorder registered under `name`.
    #[must_use]
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_owned(),
            calls: Mutex::new(Vec::new()),
            open_on_attach: AtomicBool::new(true),
            writable_work: AtomicUsize::new(0),
            rx_hook: Mutex::new(None),
        })
    }

    /// Upcast to the trait object the container registers.
    #[must_use]
    pub fn as_node_type(self: &Arc<Self>) -> Arc<dyn NodeType> {
        Arc::clone(self) as Arc<dyn NodeType>
    }

    /// Choose whether attach hooks open the link.
    pub fn set_open_on_attach(&self, open: bool) {
        self.open_on_attach.store(open, Ordering::Relaxed);
    }

    /// Set the work reported by each `on_writable` call.
    pub fn set_writable_work(&self, work: usize) {
        self.writable_work.store(work, Ordering::Relaxed);
    }

    /// Run `hook` after recording each `on_rx` call.
    ///
    /// # Panics
    ///
    /// Panics if the hook slot is poisoned.
    pub fn on_rx_run<F>(&self, hook: F)
    where
        F: Fn(&Arc<Node>, &Arc<Link>, &Arc<Delivery>) + Send + Sync + 'static,
    {
        *self.rx_hook.lock().expect("rx hook poisoned") = Some(Box::new(hook));
    }

    /// Snapshot of the recorded calls.
    ///
    /// # Panics
    ///
    /// Panics if the call log is poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// Number of recorded calls matching `predicate`.
    #[must_use]
    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|call| predicate(call)).count()
    }

    fn record(&self, call: Call) { self.calls.lock().expect("call log poisoned").push(call); }
}

fn link_name(link: &Link) -> String { link.transport().name() }

fn node_name(node: &Node) -> Option<String> { node.name().map(str::to_owned) }

impl NodeType for RecordingNodeType {
    fn type_name(&self) -> &str { &self.name }

    fn on_rx(&self, node: &Arc<Node>, link: &Arc<Link>, delivery: &Arc<Delivery>) {
        self.record(Call::Rx {
            link: link_name(link),
            delivery: delivery.id(),
        });
        if let Some(hook) = self.rx_hook.lock().expect("rx hook poisoned").as_ref() {
            hook(node, link, delivery);
        }
    }

    fn on_disposition(&self, _node: &Arc<Node>, link: &Arc<Link>, delivery: &Arc<Delivery>) {
        self.record(Call::Disposition {
            link: link_name(link),
            delivery: delivery.id(),
        });
    }

    fn on_incoming(&self, node: &Arc<Node>, link: &Arc<Link>) {
        self.record(Call::Incoming {
            link: link_name(link),
            node: node_name(node),
        });
        if self.open_on_attach.load(Ordering::Relaxed) {
            link.transport().open();
        }
    }

    fn on_outgoing(&self, node: &Arc<Node>, link: &Arc<Link>) {
        self.record(Call::Outgoing {
            link: link_name(link),
            node: node_name(node),
        });
        if self.open_on_attach.load(Ordering::Relaxed) {
            link.transport().open();
        }
    }

    fn on_writable(&self, _node: &Arc<Node>, link: &Arc<Link>) -> usize {
        self.record(Call::Writable {
            link: link_name(link),
        });
        self.writable_work.load(Ordering::Relaxed)
    }

    fn on_link_detach(&self, _node: &Arc<Node>, link: &Arc<Link>, closed: bool) {
        self.record(Call::Detach {
            link: link_name(link),
            closed,
        });
    }

    fn on_inbound_connection_open(&self, connection: &Connection) {
        self.record(Call::InboundOpen(connection.id()));
    }

    fn on_outbound_connection_open(&self, connection: &Connection) {
        self.record(Call::OutboundOpen(connection.id()));
    }
}
