//! Wake-up surface consumed from the I/O scheduler.
//!
//! The container never runs connections itself. When a link becomes able to
//! make progress it asks the [`Scheduler`] to process the owning connection
//! again. [`ChannelScheduler`] is a ready-made implementation that forwards
//! activations into a `tokio` channel for a worker pool to consume.

use std::sync::Arc;

use dashmap::DashSet;
use tokio::sync::mpsc;
use tracing::debug;

use crate::connection::ConnectionId;

/// Receives requests to process a connection again.
pub trait Scheduler: Send + Sync {
    /// Request a dispatch pass for `connection`.
    fn activate(&self, connection: ConnectionId);
}

/// Scheduler that ignores every activation.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopScheduler;

impl Scheduler for NoopScheduler {
    fn activate(&self, _connection: ConnectionId) {}
}

/// Scheduler forwarding activations over an unbounded `tokio` channel.
///
/// Activations are coalesced: while a connection's activation is waiting to
/// be taken from [`Activations`], further requests for the same connection
/// are dropped.
///
/// # Examples
///
/// ```
/// use amqp_container::{connection::ConnectionId, scheduler::{ChannelScheduler, Scheduler}};
///
/// let (scheduler, mut activations) = ChannelScheduler::channel();
/// scheduler.activate(ConnectionId::new(3));
/// scheduler.activate(ConnectionId::new(3));
/// assert_eq!(activations.try_recv(), Some(ConnectionId::new(3)));
/// assert_eq!(activations.try_recv(), None);
/// ```
pub struct ChannelScheduler {
    tx: mpsc::UnboundedSender<ConnectionId>,
    pending: Arc<DashSet<ConnectionId>>,
}

/// Receiving half of a [`ChannelScheduler`].
pub struct Activations {
    rx: mpsc::UnboundedReceiver<ConnectionId>,
    pending: Arc<DashSet<ConnectionId>>,
}

impl ChannelScheduler {
    /// Create a scheduler and the stream of activations it produces.
    #[must_use]
    pub fn channel() -> (Arc<Self>, Activations) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashSet::new());
        let scheduler = Arc::new(Self {
            tx,
            pending: Arc::clone(&pending),
        });
        (scheduler, Activations { rx, pending })
    }

    /// Returns `true` if `connection` has an activation waiting.
    #[must_use]
    pub fn is_pending(&self, connection: ConnectionId) -> bool {
        self.pending.contains(&connection)
    }
}

impl Scheduler for ChannelScheduler {
    fn activate(&self, connection: ConnectionId) {
        if !self.pending.insert(connection) {
            return;
        }
        if self.tx.send(connection).is_err() {
            self.pending.remove(&connection);
            debug!(%connection, "activation dropped: receiver closed");
        }
    }
}

impl Activations {
    /// Wait for the next connection to process.
    ///
    /// Returns `None` once every [`ChannelScheduler`] handle is dropped and
    /// the queue is drained.
    pub async fn recv(&mut self) -> Option<ConnectionId> {
        let connection = self.rx.recv().await?;
        self.pending.remove(&connection);
        Some(connection)
    }

    /// Take the next queued activation without waiting.
    pub fn try_recv(&mut self) -> Option<ConnectionId> {
        let connection = self.rx.try_recv().ok()?;
        self.pending.remove(&connection);
        Some(connection)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn activation_is_queued_once_until_taken() {
        let (scheduler, mut activations) = ChannelScheduler::channel();
        let id = ConnectionId::new(7);
        scheduler.activate(id);
        scheduler.activate(id);
        assert!(scheduler.is_pending(id));

        assert_eq!(activations.recv().await, Some(id));
        assert!(!scheduler.is_pending(id));
        assert_eq!(activations.try_recv(), None);

        scheduler.activate(id);
        assert_eq!(activations.recv().await, Some(id));
    }

    #[rstest]
    #[tokio::test]
    async fn distinct_connections_keep_order() {
        let (scheduler, mut activations) = ChannelScheduler::channel();
        for raw in [1, 2, 3] {
            scheduler.activate(ConnectionId::new(raw));
        }
        drop(scheduler);
        let mut seen = Vec::new();
        while let Some(id) = activations.recv().await {
            seen.push(id.as_u64());
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn closed_receiver_clears_pending_flag() {
        let (scheduler, activations) = ChannelScheduler::channel();
        drop(activations);
        let id = ConnectionId::new(1);
        scheduler.activate(id);
        assert!(!scheduler.is_pending(id));
    }
}
