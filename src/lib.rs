//! Public API for the `amqp_container` library.
//!
//! This crate is the connection-event dispatch core of an AMQP message
//! router. A [`Container`] owns registries of pluggable [`NodeType`]s and
//! named [`Node`]s, turns protocol-engine events on each [`Connection`] into
//! node hook calls, and manages the [`Link`] and [`Delivery`] wrappers that
//! bridge engine primitives to routing logic.

pub mod address;
pub mod config;
pub mod connection;
pub mod container;
pub mod context;
pub mod delivery;
mod dispatch;
pub mod error;
pub mod link;
pub mod metrics;
pub mod node;
pub mod scheduler;
pub mod transport;

pub use config::ContainerConfig;
pub use connection::{Connection, ConnectionEvent, ConnectionId, Direction};
pub use container::{Container, ContainerGuard};
pub use context::{Context, context};
pub use delivery::{Delivery, DeliveryId};
/// Result type alias re-exported for convenience when working with the
/// container.
pub use error::{ContainerError, Result};
pub use link::{DrainChange, Link};
pub use node::{DistMode, LifePolicy, Node, NodeType};
pub use scheduler::{ChannelScheduler, NoopScheduler, Scheduler};
pub use transport::Disposition;
