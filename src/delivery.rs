//! Delivery wrappers and their lock-held lifecycle.
//!
//! A [`Delivery`] is one transfer attempt on a [`Link`]. The container keeps
//! a slot per live delivery holding its peer, its in-flight count and its
//! pending-delete flag. Those fields span connections, so they are only
//! reachable through a [`ContainerGuard`]; the delivery handle itself can be
//! used freely from the worker that owns its connection.
//!
//! A delivery is freed once [`ContainerGuard::free`] has been requested and
//! its in-flight count is zero. Freeing removes the slot; the handle stays
//! valid as a value but [`ContainerGuard::is_live`] reports `false`.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicU64, Ordering},
};

use log::trace;

use crate::{
    container::ContainerGuard,
    context::{Context, ContextSlot, lock},
    error::{ContainerError, Result},
    link::Link,
    metrics,
    transport::{Disposition, TransportDelivery},
};

/// Container-wide identity of a delivery wrapper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeliveryId(u64);

impl DeliveryId {
    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl std::fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DeliveryId({})", self.0)
    }
}

/// One transfer attempt on a link.
pub struct Delivery {
    id: DeliveryId,
    link: Arc<Link>,
    transport: Mutex<Option<Arc<dyn TransportDelivery>>>,
    disposition: AtomicU64,
    context: ContextSlot,
}

impl Delivery {
    /// Container-wide identity.
    #[must_use]
    pub fn id(&self) -> DeliveryId { self.id }

    /// Link carrying the delivery.
    #[must_use]
    pub fn link(&self) -> &Arc<Link> { &self.link }

    /// The transport delivery, until the delivery is settled.
    #[must_use]
    pub fn transport(&self) -> Option<Arc<dyn TransportDelivery>> { lock(&self.transport).clone() }

    /// The delivery's handler context.
    #[must_use]
    pub fn context(&self) -> Option<Context> { self.context.get() }

    /// The delivery's handler context downcast to `T`.
    #[must_use]
    pub fn context_as<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.context.get_as()
    }

    /// Replace the delivery's handler context.
    pub fn set_context(&self, context: Option<Context>) { self.context.set(context); }

    /// Apply a local disposition without settling.
    ///
    /// Does nothing once the delivery is settled.
    pub fn update(&self, disposition: Disposition) {
        if let Some(transport) = self.transport() {
            transport.update(disposition);
        }
    }

    /// Settle locally and detach from the transport delivery.
    ///
    /// Repeated calls have no further effect.
    pub fn settle(&self) {
        let Some(transport) = lock(&self.transport).take() else {
            return;
        };
        if let Some(conn) = self.link.connection() {
            conn.forget_delivery(transport.key());
        }
        transport.settle();
    }

    /// Drop the transport delivery without settling it.
    ///
    /// Used when the connection is torn down underneath the delivery.
    pub(crate) fn orphan(&self) { lock(&self.transport).take(); }

    /// Returns `true` if the peer has settled.
    ///
    /// A delivery that is no longer attached to its transport delivery counts
    /// as settled.
    #[must_use]
    pub fn remote_settled(&self) -> bool {
        self.transport().is_none_or(|t| t.remote_settled())
    }

    /// Returns `true` if the peer's disposition differs from the last one
    /// read through [`disposition`](Self::disposition).
    #[must_use]
    pub fn disposition_changed(&self) -> bool {
        self.transport()
            .is_some_and(|t| t.remote_state() != self.cached_disposition())
    }

    /// Read and remember the peer's disposition.
    ///
    /// Once settled, returns the last value read.
    pub fn disposition(&self) -> Disposition {
        match self.transport() {
            Some(transport) => {
                let remote = transport.remote_state();
                self.disposition.store(remote.code(), Ordering::Release);
                remote
            }
            None => self.cached_disposition(),
        }
    }

    fn cached_disposition(&self) -> Disposition {
        Disposition::from_code(self.disposition.load(Ordering::Acquire))
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("id", &self.id)
            .field("link", &self.link.key())
            .field("settled", &lock(&self.transport).is_none())
            .finish_non_exhaustive()
    }
}

pub(crate) struct DeliverySlot {
    delivery: Arc<Delivery>,
    peer: Option<DeliveryId>,
    in_flight: usize,
    pending_delete: bool,
}

impl ContainerGuard<'_> {
    /// Wrap `transport` as a new delivery on `link`.
    /// Start a new outbound delivery tagged `tag` on `link`.
    ///
    /// The delivery becomes the link's current delivery until it is
    /// settled or the link is advanced past it. Callable while routing the
    /// inbound side, so the new delivery can be peer-linked under the same
    /// guard.
    ///
    /// # Errors
    ///
    /// Returns [`ContainerError::ConnectionClosed`] if the link's
    /// connection is gone and [`ContainerError::DeliveryUnavailable`] if
    /// the transport refuses to create the delivery.
    ///
    /// # Panics
    ///
    /// Panics if the link already has a current delivery.
    pub fn deliver(&mut self, link: &Arc<Link>, tag: &[u8]) -> Result<Arc<Delivery>> {
        let handle = link.transport();
        assert!(
            handle.current().is_none(),
            "link '{}' already has a current outbound delivery",
            handle.name()
        );
        let connection = link.connection().ok_or(ContainerError::ConnectionClosed)?;
        let transport = handle
            .delivery(tag)
            .ok_or(ContainerError::DeliveryUnavailable)?;
        let delivery = self.insert_delivery(Arc::clone(link), Arc::clone(&transport));
        connection.remember_delivery(transport.key(), Arc::clone(&delivery));
        Ok(delivery)
    }

    pub(crate) fn insert_delivery(
        &mut self,
        link: Arc<Link>,
        transport: Arc<dyn TransportDelivery>,
    ) -> Arc<Delivery> {
        let id = DeliveryId(self.registry.next_delivery);
        self.registry.next_delivery += 1;
        let delivery = Arc::new(Delivery {
            id,
            link,
            transport: Mutex::new(Some(transport)),
            disposition: AtomicU64::new(Disposition::NONE.code()),
            context: ContextSlot::default(),
        });
        self.registry.deliveries.insert(
            id,
            DeliverySlot {
                delivery: Arc::clone(&delivery),
                peer: None,
                in_flight: 0,
                pending_delete: false,
            },
        );
        metrics::inc_deliveries_created();
        delivery
    }

    fn slot(&mut self, delivery: &Delivery) -> &mut DeliverySlot {
        match self.registry.deliveries.get_mut(&delivery.id) {
            Some(slot) => slot,
            None => panic!("{} used after it was freed", delivery.id),
        }
    }

    /// Returns `true` until `delivery` has been freed.
    #[must_use]
    pub fn is_live(&self, delivery: &Delivery) -> bool {
        self.registry.deliveries.contains_key(&delivery.id)
    }

    /// Number of external queues currently holding `delivery`.
    ///
    /// Zero once the delivery has been freed.
    #[must_use]
    pub fn in_flight(&self, delivery: &Delivery) -> usize {
        self.registry
            .deliveries
            .get(&delivery.id)
            .map_or(0, |slot| slot.in_flight)
    }

    /// Make `a` and `b` each other's peer.
    ///
    /// Any previous peer of either delivery is overwritten without being
    /// unlinked; call [`unlink`](Self::unlink) first if one may exist.
    ///
    /// # Panics
    ///
    /// Panics if either delivery has been freed.
    pub fn link_peers(&mut self, a: &Delivery, b: &Delivery) {
        self.slot(a).peer = Some(b.id);
        self.slot(b).peer = Some(a.id);
    }

    /// Clear the peer relationship of `delivery` on both sides.
    pub fn unlink(&mut self, delivery: &Delivery) {
        let Some(slot) = self.registry.deliveries.get_mut(&delivery.id) else {
            return;
        };
        let Some(peer) = slot.peer.take() else {
            return;
        };
        if let Some(other) = self.registry.deliveries.get_mut(&peer) {
            if other.peer == Some(delivery.id) {
                other.peer = None;
            }
        }
    }

    /// The peer of `delivery`, if linked.
    #[must_use]
    pub fn peer(&self, delivery: &Delivery) -> Option<Arc<Delivery>> {
        let peer = self.registry.deliveries.get(&delivery.id)?.peer?;
        self.registry
            .deliveries
            .get(&peer)
            .map(|slot| Arc::clone(&slot.delivery))
    }

    /// Record that `delivery` entered an external queue.
    ///
    /// # Panics
    ///
    /// Panics if the delivery has been freed.
    pub fn fifo_enter(&mut self, delivery: &Delivery) { self.slot(delivery).in_flight += 1; }

    /// Record that `delivery` left an external queue.
    ///
    /// Returns `true` if this was the last queue and a free had been
    /// requested meanwhile, in which case the delivery is now freed.
    ///
    /// # Panics
    ///
    /// Panics if the delivery has been freed or was not in any queue.
    #[must_use]
    pub fn fifo_exit(&mut self, delivery: &Delivery) -> bool {
        let slot = self.slot(delivery);
        assert!(slot.in_flight > 0, "{} left more queues than it entered", delivery.id);
        slot.in_flight -= 1;
        if slot.in_flight == 0 && slot.pending_delete {
            self.release(delivery.id);
            return true;
        }
        false
    }

    /// Free `delivery`.
    ///
    /// If the delivery is still attached to its transport delivery,
    /// `final_disposition` is applied (unless it is [`Disposition::NONE`])
    /// and the delivery is settled. The wrapper itself is released now, or
    /// when its in-flight count drops to zero.
    ///
    /// # Panics
    ///
    /// Panics if the delivery is still linked to a peer or has already been
    /// freed.
    pub fn free(&mut self, delivery: &Delivery, final_disposition: Disposition) {
        if !final_disposition.is_none() {
            delivery.update(final_disposition);
        }
        delivery.settle();
        let slot = self.slot(delivery);
        assert!(slot.peer.is_none(), "{} freed while linked to a peer", delivery.id);
        if slot.in_flight > 0 {
            slot.pending_delete = true;
            trace!("{} free deferred: in {} queue(s)", delivery.id, slot.in_flight);
        } else {
            self.release(delivery.id);
        }
    }

    fn release(&mut self, id: DeliveryId) {
        if self.registry.deliveries.remove(&id).is_some() {
            metrics::inc_deliveries_freed();
            trace!("{id} freed");
        }
    }
}
