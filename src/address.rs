//! Identifier-prefix view of terminus addresses.
//!
//! Node lookup does not parse structured addresses. It keys the name table
//! on the node identifier: the first path segment after an optional
//! `scheme://authority/` prefix.

/// Return the node identifier portion of `address`.
///
/// - `queue1` yields `queue1`
/// - `queue1/partition-a` yields `queue1`
/// - `amqp://broker:5672/queue1/partition-a` yields `queue1`
/// - `/queue1` yields `queue1`
///
/// # Examples
///
/// ```
/// use amqp_container::address::node_id;
///
/// assert_eq!(node_id("amqp://host:5672/orders/eu"), "orders");
/// assert_eq!(node_id("orders"), "orders");
/// ```
#[must_use]
pub fn node_id(address: &str) -> &str {
    let path = match address.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map_or("", |(_, path)| path),
        None => address.strip_prefix('/').unwrap_or(address),
    };
    path.split_once('/').map_or(path, |(id, _)| id)
}
