//! The shared container owning node types, nodes and delivery slots.
//!
//! All registries sit behind a single lock. Registry operations take it for
//! the duration of one lookup, insert or removal and release it before any
//! node hook runs. Operations that must happen under the lock across several
//! calls (delivery peer-linking and in-flight accounting) are only reachable
//! through the [`ContainerGuard`] returned by [`Container::lock`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use log::{debug, trace};

use crate::{
    address,
    config::ContainerConfig,
    connection::{Connection, ConnectionId},
    context::{Context, lock},
    delivery::{DeliveryId, DeliverySlot},
    error::{ContainerError, Result},
    metrics,
    node::{DistMode, LifePolicy, Node, NodeType},
    scheduler::Scheduler,
    transport::TransportConnection,
};

#[derive(Default)]
pub(crate) struct Registry {
    node_types: HashMap<String, Arc<dyn NodeType>>,
    node_type_list: Vec<Arc<dyn NodeType>>,
    nodes: HashMap<String, Arc<Node>>,
    default_node: Option<Arc<Node>>,
    pub(crate) deliveries: HashMap<DeliveryId, DeliverySlot>,
    pub(crate) next_delivery: u64,
}

pub(crate) struct Shared {
    config: ContainerConfig,
    registry: Mutex<Registry>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let registry = self
            .registry
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(node) = registry.default_node.take() {
            retire(&node);
        }
        for (_, node) in registry.nodes.drain() {
            retire(&node);
        }
    }
}

/// Record the destruction of `node` exactly once.
fn retire(node: &Node) {
    if node.mark_destroyed() {
        metrics::inc_nodes_destroyed();
        trace!("node '{}' destroyed", node.label());
    }
}

/// Cloneable handle to the shared container state.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use amqp_container::{Container, DistMode, LifePolicy, NodeType};
///
/// struct Anycast;
///
/// impl NodeType for Anycast {
///     fn type_name(&self) -> &str { "anycast" }
/// }
///
/// let container = Container::default();
/// let anycast: Arc<dyn NodeType> = Arc::new(Anycast);
/// container.register_node_type(Arc::clone(&anycast)).expect("first registration");
/// let node = container
///     .create_node(&anycast, Some("queue1"), None, DistMode::Move, LifePolicy::Permanent)
///     .expect("unique name");
/// let found = container.lookup("amqp://broker/queue1").expect("node is registered");
/// assert!(Arc::ptr_eq(&node, &found));
/// ```
#[derive(Clone)]
pub struct Container {
    shared: Arc<Shared>,
}

impl Default for Container {
    fn default() -> Self { Self::new(ContainerConfig::default()) }
}

/// Exclusive access to the container's lock-protected state.
///
/// Holding a guard blocks every registry operation on every connection, so
/// keep it only for the few calls that need it. Calling a [`Container`]
/// registry method while holding a guard on the same container deadlocks.
pub struct ContainerGuard<'a> {
    pub(crate) registry: MutexGuard<'a, Registry>,
}

impl Container {
    /// Create an empty container.
    #[must_use]
    pub fn new(config: ContainerConfig) -> Self {
        debug!("container initialising");
        Self {
            shared: Arc::new(Shared {
                config,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self { Self { shared } }

    /// Settings applied to every connection.
    #[must_use]
    pub fn config(&self) -> &ContainerConfig { &self.shared.config }

    /// Acquire the container lock.
    pub fn lock(&self) -> ContainerGuard<'_> {
        ContainerGuard {
            registry: lock(&self.shared.registry),
        }
    }

    /// Returns `true` if both handles refer to the same container.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool { Arc::ptr_eq(&self.shared, &other.shared) }

    /// Register a node type under its [`NodeType::type_name`].
    ///
    /// Registered types are notified of every connection that opens, in
    /// registration order. Types are never unregistered.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::DuplicateNodeType`] if a type with the same
    /// name is already registered; the registry is left unchanged.
    pub fn register_node_type(&self, node_type: Arc<dyn NodeType>) -> Result<()> {
        let name = node_type.type_name().to_owned();
        {
            let mut guard = self.lock();
            let registry = &mut guard.registry;
            if registry.node_types.contains_key(&name) {
                return Err(ContainerError::DuplicateNodeType(name));
            }
            registry
                .node_types
                .insert(name.clone(), Arc::clone(&node_type));
            registry.node_type_list.push(node_type);
        }
        metrics::inc_node_types();
        debug!("node type registered: {name}");
        Ok(())
    }

    /// Look up a registered node type by name.
    #[must_use]
    pub fn node_type(&self, name: &str) -> Option<Arc<dyn NodeType>> {
        self.lock().registry.node_types.get(name).cloned()
    }

    /// Number of registered node types.
    #[must_use]
    pub fn node_type_count(&self) -> usize { self.lock().registry.node_type_list.len() }

    /// The `index`th registered node type, in registration order.
    pub(crate) fn node_type_at(&self, index: usize) -> Option<Arc<dyn NodeType>> {
        self.lock().registry.node_type_list.get(index).cloned()
    }

    /// Create a node of `node_type`.
    ///
    /// A named node is entered into the name table and becomes reachable
    /// through [`lookup`](Self::lookup). An anonymous node is returned to the
    /// caller only.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::DuplicateNode`] if `name` is already taken.
    pub fn create_node(
        &self,
        node_type: &Arc<dyn NodeType>,
        name: Option<&str>,
        context: Option<Context>,
        dist_modes: DistMode,
        life_policy: LifePolicy,
    ) -> Result<Arc<Node>> {
        let node = Arc::new(Node::new(
            Arc::downgrade(&self.shared),
            Arc::clone(node_type),
            name,
            context,
            dist_modes,
            life_policy,
        ));
        if let Some(name) = name {
            let mut guard = self.lock();
            if guard.registry.nodes.contains_key(name) {
                return Err(ContainerError::DuplicateNode(name.to_owned()));
            }
            guard
                .registry
                .nodes
                .insert(name.to_owned(), Arc::clone(&node));
            drop(guard);
            debug!(
                "node of type '{}' created with name '{name}'",
                node_type.type_name()
            );
        }
        metrics::inc_nodes_created();
        Ok(node)
    }

    /// Replace the default node.
    ///
    /// The previous default, if any, is destroyed before the new one is
    /// installed, under a single acquisition of the lock. Passing `None`
    /// removes the default. Returns the newly installed node.
    pub fn set_default_node(
        &self,
        node_type: Option<&Arc<dyn NodeType>>,
        context: Option<Context>,
        dist_modes: DistMode,
    ) -> Option<Arc<Node>> {
        let node = node_type.map(|nt| {
            Arc::new(Node::new(
                Arc::downgrade(&self.shared),
                Arc::clone(nt),
                None,
                context,
                dist_modes,
                LifePolicy::Permanent,
            ))
        });
        {
            let mut guard = self.lock();
            if let Some(previous) = guard.registry.default_node.take() {
                retire(&previous);
            }
            guard.registry.default_node.clone_from(&node);
        }
        match node_type {
            Some(nt) => {
                metrics::inc_nodes_created();
                debug!("node of type '{}' installed as default node", nt.type_name());
            }
            None => debug!("default node removed"),
        }
        node
    }

    /// The installed default node.
    #[must_use]
    pub fn default_node(&self) -> Option<Arc<Node>> { self.lock().registry.default_node.clone() }

    /// Destroy `node`.
    ///
    /// Removes the name-table entry if it still refers to `node`, and
    /// uninstalls it if it is the default. Destroying a node twice has no
    /// further effect. Links already bound to the node are not tracked
    /// here; they keep dispatching to it until they close.
    pub fn destroy_node(&self, node: &Arc<Node>) {
        {
            let mut guard = self.lock();
            let registry = &mut guard.registry;
            if let Some(name) = node.name() {
                if registry
                    .nodes
                    .get(name)
                    .is_some_and(|entry| Arc::ptr_eq(entry, node))
                {
                    registry.nodes.remove(name);
                }
            }
            if registry
                .default_node
                .as_ref()
                .is_some_and(|default| Arc::ptr_eq(default, node))
            {
                registry.default_node = None;
            }
        }
        retire(node);
    }

    /// Resolve `address` to a node.
    ///
    /// Only the identifier prefix of the address (see
    /// [`address::node_id`]) is matched against the name table. On a miss
    /// the default node is returned, if one is installed.
    #[must_use]
    pub fn lookup(&self, address: &str) -> Option<Arc<Node>> { self.resolve(Some(address)) }

    pub(crate) fn resolve(&self, address: Option<&str>) -> Option<Arc<Node>> {
        let guard = self.lock();
        address
            .and_then(|addr| guard.registry.nodes.get(address::node_id(addr)))
            .or(guard.registry.default_node.as_ref())
            .cloned()
    }

    /// Number of named nodes.
    #[must_use]
    pub fn node_count(&self) -> usize { self.lock().registry.nodes.len() }

    /// Wrap a transport connection for dispatch by this container.
    ///
    /// `context` is the opaque value handed over by the scheduler (for
    /// example listener or connector configuration); node types can read it
    /// from their connection-open hooks.
    #[must_use]
    pub fn connection(
        &self,
        id: ConnectionId,
        transport: Arc<dyn TransportConnection>,
        scheduler: Arc<dyn Scheduler>,
        context: Option<Context>,
    ) -> Connection {
        Connection::new(id, transport, scheduler, self.shared.config, context)
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}
