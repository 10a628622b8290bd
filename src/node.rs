//! Pluggable node types and their instances.
//!
//! A [`NodeType`] is the capability set shared by every [`Node`] of that
//! type: the container calls its hooks when links attach to one of its
//! nodes, when transfers arrive, when links may write, and when
//! connections open. The implementing value itself is the type-level
//! context. Each [`Node`] additionally carries its own replaceable context.

use std::sync::{
    Arc,
    Weak,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    connection::Connection,
    container::{Container, Shared},
    context::{Context, ContextSlot},
    delivery::Delivery,
    link::Link,
};

/// Hooks invoked by the container on behalf of a node type.
///
/// Every hook runs without the container lock held, on the worker that is
/// processing the connection in question. Hooks should return promptly;
/// in particular [`on_writable`](Self::on_writable) is called once per active
/// link per dispatch pass and must not loop waiting for credit.
///
/// ```
/// use std::sync::Arc;
///
/// use amqp_container::{Link, Node, NodeType};
///
/// struct Sink;
///
/// impl NodeType for Sink {
///     fn type_name(&self) -> &str { "sink" }
///
///     fn on_incoming(&self, _node: &Arc<Node>, link: &Arc<Link>) {
///         link.transport().flow(10);
///         link.transport().open();
///     }
/// }
/// ```
pub trait NodeType: Send + Sync + 'static {
    /// Name under which the type is registered.
    fn type_name(&self) -> &str;

    /// A transfer on `link` is readable.
    fn on_rx(&self, _node: &Arc<Node>, _link: &Arc<Link>, _delivery: &Arc<Delivery>) {}

    /// The peer updated the disposition of `delivery`.
    fn on_disposition(&self, _node: &Arc<Node>, _link: &Arc<Link>, _delivery: &Arc<Delivery>) {}

    /// The peer attached a link on which it will send to this node.
    fn on_incoming(&self, _node: &Arc<Node>, _link: &Arc<Link>) {}

    /// The peer attached a link on which it will receive from this node.
    fn on_outgoing(&self, _node: &Arc<Node>, _link: &Arc<Link>) {}

    /// `link` is fully active and may send.
    ///
    /// The return value is added to the work count reported to the
    /// scheduler for fairness accounting.
    fn on_writable(&self, _node: &Arc<Node>, _link: &Arc<Link>) -> usize { 0 }

    /// `link` is going away.
    ///
    /// `closed` is `true` for a detach requested by the peer and `false`
    /// when the link is orphaned by connection teardown.
    fn on_link_detach(&self, _node: &Arc<Node>, _link: &Arc<Link>, _closed: bool) {}

    /// A connection accepted by a listener has opened.
    fn on_inbound_connection_open(&self, _connection: &Connection) {}

    /// A connection initiated by a connector has opened.
    fn on_outbound_connection_open(&self, _connection: &Connection) {}
}

/// Distribution modes a node supports for outgoing links.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DistMode {
    /// Messages are copied to every consumer.
    Copy,
    /// Each message is moved to one consumer.
    #[default]
    Move,
    /// Either mode on request.
    Both,
}

/// When a node should be discarded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum LifePolicy {
    /// Lives until explicitly destroyed.
    #[default]
    Permanent,
    /// Discarded when the creating link's connection closes.
    DeleteOnClose,
    /// Discarded when no links remain.
    DeleteOnNoLinks,
    /// Discarded when no messages remain.
    DeleteOnNoMessages,
    /// Discarded when no links and no messages remain.
    DeleteOnNoLinksOrMessages,
}

/// Instance of a [`NodeType`].
pub struct Node {
    name: Option<String>,
    node_type: Arc<dyn NodeType>,
    context: ContextSlot,
    dist_modes: DistMode,
    life_policy: LifePolicy,
    container: Weak<Shared>,
    destroyed: AtomicBool,
}

impl Node {
    pub(crate) fn new(
        container: Weak<Shared>,
        node_type: Arc<dyn NodeType>,
        name: Option<&str>,
        context: Option<Context>,
        dist_modes: DistMode,
        life_policy: LifePolicy,
    ) -> Self {
        Self {
            name: name.map(str::to_owned),
            node_type,
            context: ContextSlot::new(context),
            dist_modes,
            life_policy,
            container,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Name of the node, or `None` for anonymous and default nodes.
    #[must_use]
    pub fn name(&self) -> Option<&str> { self.name.as_deref() }

    /// The type whose hooks serve this node.
    #[must_use]
    pub fn node_type(&self) -> &Arc<dyn NodeType> { &self.node_type }

    /// Supported distribution modes.
    #[must_use]
    pub fn dist_modes(&self) -> DistMode { self.dist_modes }

    /// Lifetime policy.
    #[must_use]
    pub fn life_policy(&self) -> LifePolicy { self.life_policy }

    /// The node's handler context.
    #[must_use]
    pub fn context(&self) -> Option<Context> { self.context.get() }

    /// The node's handler context downcast to `T`.
    #[must_use]
    pub fn context_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.context.get_as()
    }

    /// Replace the node's handler context.
    pub fn set_context(&self, context: Option<Context>) { self.context.set(context); }

    /// The container that created this node, if it still exists.
    #[must_use]
    pub fn container(&self) -> Option<Container> {
        self.container.upgrade().map(Container::from_shared)
    }

    /// Returns `true` once the node has been destroyed.
    ///
    /// Links bound before destruction keep a reference to the node and
    /// continue to dispatch to it until they close.
    #[must_use]
    pub fn is_destroyed(&self) -> bool { self.destroyed.load(Ordering::Acquire) }

    /// Mark the node destroyed. Returns `false` if it already was.
    pub(crate) fn mark_destroyed(&self) -> bool { !self.destroyed.swap(true, Ordering::AcqRel) }

    /// Label used in logs.
    pub(crate) fn label(&self) -> &str { self.name.as_deref().unwrap_or("<default>") }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("type", &self.node_type.type_name())
            .field("dist_modes", &self.dist_modes)
            .field("life_policy", &self.life_policy)
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}
