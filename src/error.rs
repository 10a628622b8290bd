//! Error types for registry setup and link operations.

use thiserror::Error;

/// Errors reported by the container and its wrappers.
///
/// Invariant violations in the calling routing logic (a second current
/// outbound delivery on one link, freeing a peer-linked delivery) are not
/// represented here; they abort with a panic.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ContainerError {
    /// A node type with the provided name was already registered.
    #[error("node type '{0}' was already registered")]
    DuplicateNodeType(String),
    /// A node with the provided name already exists.
    #[error("node '{0}' already exists")]
    DuplicateNode(String),
    /// The container owning a node was dropped.
    #[error("container has been dropped")]
    ContainerDropped,
    /// The connection owning a link has been torn down.
    #[error("connection has been closed")]
    ConnectionClosed,
    /// The transport refused to create a delivery.
    #[error("transport did not produce a delivery")]
    DeliveryUnavailable,
}

/// Result type used throughout the container API.
pub type Result<T> = std::result::Result<T, ContainerError>;
