//! Metric helpers for the container.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the counter tracking node type registrations.
pub const NODE_TYPES_REGISTERED: &str = "container_node_types_registered_total";
/// Name of the counter tracking node creation.
pub const NODES_CREATED: &str = "container_nodes_created_total";
/// Name of the counter tracking node destruction.
pub const NODES_DESTROYED: &str = "container_nodes_destroyed_total";
/// Name of the gauge tracking live link wrappers.
pub const LINKS_ACTIVE: &str = "container_links_active";
/// Name of the counter tracking link wrappers created for peer attaches.
pub const LINKS_ATTACHED: &str = "container_links_attached_total";
/// Name of the counter tracking detach notifications delivered to nodes.
pub const LINKS_DETACHED: &str = "container_links_detached_total";
/// Name of the counter tracking attaches closed for lack of a node.
pub const LINKS_REFUSED: &str = "container_links_refused_total";
/// Name of the counter tracking delivery wrappers allocated.
pub const DELIVERIES_CREATED: &str = "container_deliveries_created_total";
/// Name of the counter tracking delivery wrappers released.
pub const DELIVERIES_FREED: &str = "container_deliveries_freed_total";
/// Name of the counter tracking transfers rejected as unroutable.
pub const DELIVERIES_REJECTED: &str = "container_deliveries_rejected_total";
/// Name of the counter tracking protocol events consumed.
pub const EVENTS_PROCESSED: &str = "container_events_processed_total";

/// Record a node type registration.
pub fn inc_node_types() {
    #[cfg(feature = "metrics")]
    counter!(NODE_TYPES_REGISTERED).increment(1);
}

/// Record a node creation.
pub fn inc_nodes_created() {
    #[cfg(feature = "metrics")]
    counter!(NODES_CREATED).increment(1);
}

/// Record a node destruction.
pub fn inc_nodes_destroyed() {
    #[cfg(feature = "metrics")]
    counter!(NODES_DESTROYED).increment(1);
}

/// Increment the live links gauge.
pub fn inc_links() {
    #[cfg(feature = "metrics")]
    gauge!(LINKS_ACTIVE).increment(1.0);
}

/// Decrement the live links gauge.
pub fn dec_links() {
    #[cfg(feature = "metrics")]
    gauge!(LINKS_ACTIVE).decrement(1.0);
}

/// Record a link wrapper created for a peer attach.
pub fn inc_links_attached() {
    #[cfg(feature = "metrics")]
    counter!(LINKS_ATTACHED).increment(1);
}

/// Record a detach notification.
pub fn inc_links_detached() {
    #[cfg(feature = "metrics")]
    counter!(LINKS_DETACHED).increment(1);
}

/// Record an attach refused because no node matched.
pub fn inc_links_refused() {
    #[cfg(feature = "metrics")]
    counter!(LINKS_REFUSED).increment(1);
}

/// Record a delivery wrapper allocation.
pub fn inc_deliveries_created() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_CREATED).increment(1);
}

/// Record a delivery wrapper release.
pub fn inc_deliveries_freed() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_FREED).increment(1);
}

/// Record an unroutable transfer rejection.
pub fn inc_deliveries_rejected() {
    #[cfg(feature = "metrics")]
    counter!(DELIVERIES_REJECTED).increment(1);
}

/// Record `count` consumed protocol events.
pub fn add_events(count: usize) {
    #[cfg(feature = "metrics")]
    counter!(EVENTS_PROCESSED).increment(count as u64);
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}
