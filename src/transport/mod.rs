//! Protocol-engine surface consumed by the container.
//!
//! The container never encodes frames or accounts for flow control itself.
//! It drives an engine through the traits in this module: endpoints expose
//! their local/remote state and open/close primitives, links expose their
//! termini and credit, and deliveries expose their readable/updated flags
//! and settlement. Handles are shared through `Arc<dyn …>` so wrappers can
//! hold on to them across dispatch passes.
//!
//! [`memory`] provides a loopback engine that simulates the remote peer.

pub mod memory;

use std::sync::Arc;

/// Local or remote half of an endpoint state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not yet opened.
    Uninit,
    /// Opened and not closed.
    Active,
    /// Closed.
    Closed,
}

/// Combined local and remote state of a connection, session or link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EndpointState {
    /// State requested by this side.
    pub local: Phase,
    /// State last announced by the peer.
    pub remote: Phase,
}

impl EndpointState {
    /// Both sides uninitialised.
    pub const UNINIT: Self = Self::new(Phase::Uninit, Phase::Uninit);

    /// Construct a state from its halves.
    #[must_use]
    pub const fn new(local: Phase, remote: Phase) -> Self { Self { local, remote } }

    /// The local side has not been opened yet.
    #[must_use]
    pub fn is_local_uninit(self) -> bool { self.local == Phase::Uninit }

    /// The local side is open.
    #[must_use]
    pub fn is_local_active(self) -> bool { self.local == Phase::Active }

    /// Both sides are open.
    #[must_use]
    pub fn is_fully_active(self) -> bool {
        self.local == Phase::Active && self.remote == Phase::Active
    }

    /// The peer closed while the local side is still open.
    #[must_use]
    pub fn is_remote_closing(self) -> bool {
        self.local == Phase::Active && self.remote == Phase::Closed
    }
}

/// Role of a link as seen from this side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    /// Messages flow from this side to the peer.
    Sender,
    /// Messages flow from the peer to this side.
    Receiver,
}

macro_rules! key_type {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl From<u64> for $name {
            fn from(value: u64) -> Self { Self(value) }
        }

        impl $name {
            /// Return the inner `u64` representation.
            #[must_use]
            pub fn as_u64(&self) -> u64 { self.0 }
        }
    };
}

key_type!(
    /// Engine-assigned identity of a session, unique per connection.
    SessionKey
);
key_type!(
    /// Engine-assigned identity of a link, unique per connection.
    LinkKey
);
key_type!(
    /// Engine-assigned identity of a delivery, unique per connection.
    DeliveryKey
);

/// Terminal outcome code of a delivery.
///
/// Values are the AMQP 1.0 outcome descriptor codes. [`Disposition::NONE`]
/// means no outcome has been recorded, and when passed to
/// [`ContainerGuard::free`](crate::ContainerGuard::free) it leaves the
/// delivery's state unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Disposition(u64);

impl Disposition {
    /// No outcome.
    pub const NONE: Self = Self(0);
    /// Partial receipt.
    pub const RECEIVED: Self = Self(0x23);
    /// Successfully processed.
    pub const ACCEPTED: Self = Self(0x24);
    /// Invalid and not processed.
    pub const REJECTED: Self = Self(0x25);
    /// Not processed; may be redelivered.
    pub const RELEASED: Self = Self(0x26);
    /// Not processed; annotations modified.
    pub const MODIFIED: Self = Self(0x27);

    /// Wrap a raw descriptor code.
    #[must_use]
    pub const fn from_code(code: u64) -> Self { Self(code) }

    /// Return the raw descriptor code.
    #[must_use]
    pub const fn code(self) -> u64 { self.0 }

    /// Returns `true` when no outcome is recorded.
    #[must_use]
    pub const fn is_none(self) -> bool { self.0 == 0 }
}

/// Event popped from a connection's event queue.
#[derive(Clone)]
pub enum TransportEvent {
    /// The peer changed the connection state.
    ConnectionRemoteState,
    /// The peer changed a session's state.
    SessionRemoteState(Arc<dyn TransportSession>),
    /// The peer changed a link's state.
    LinkRemoteState(Arc<dyn TransportLink>),
    /// A delivery became readable or its remote state was updated.
    Delivery(Arc<dyn TransportDelivery>),
    /// Any event the container does not act on.
    Other,
}

impl std::fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionRemoteState => f.write_str("ConnectionRemoteState"),
            Self::SessionRemoteState(session) => f
                .debug_tuple("SessionRemoteState")
                .field(&session.key())
                .finish(),
            Self::LinkRemoteState(link) => {
                f.debug_tuple("LinkRemoteState").field(&link.key()).finish()
            }
            Self::Delivery(delivery) => f.debug_tuple("Delivery").field(&delivery.key()).finish(),
            Self::Other => f.write_str("Other"),
        }
    }
}

/// Connection endpoint owned by the protocol engine.
pub trait TransportConnection: Send + Sync {
    /// Current local/remote state.
    fn state(&self) -> EndpointState;
    /// Open the local side.
    fn open(&self);
    /// Close the local side.
    fn close(&self);
    /// Return the oldest unconsumed event without removing it.
    fn peek_event(&self) -> Option<TransportEvent>;
    /// Remove the oldest unconsumed event.
    fn pop_event(&self);
    /// Every session on the connection, in creation order.
    fn sessions(&self) -> Vec<Arc<dyn TransportSession>>;
    /// Every link on the connection, in creation order.
    fn links(&self) -> Vec<Arc<dyn TransportLink>>;
    /// Create a new, locally uninitialised session.
    fn session(&self) -> Arc<dyn TransportSession>;
}

/// Session endpoint owned by the protocol engine.
pub trait TransportSession: Send + Sync {
    /// Identity of the session.
    fn key(&self) -> SessionKey;
    /// Current local/remote state.
    fn state(&self) -> EndpointState;
    /// Open the local side.
    fn open(&self);
    /// Close the local side.
    fn close(&self);
    /// Set the incoming window in bytes.
    fn set_incoming_capacity(&self, capacity: usize);
    /// Create a sending link named `name`.
    fn sender(&self, name: &str) -> Arc<dyn TransportLink>;
    /// Create a receiving link named `name`.
    fn receiver(&self, name: &str) -> Arc<dyn TransportLink>;
}

/// Link endpoint owned by the protocol engine.
pub trait TransportLink: Send + Sync {
    /// Identity of the link.
    fn key(&self) -> LinkKey;
    /// Link name.
    fn name(&self) -> String;
    /// Local role.
    fn role(&self) -> Role;
    /// Current local/remote state.
    fn state(&self) -> EndpointState;
    /// Session carrying the link.
    fn session(&self) -> Arc<dyn TransportSession>;
    /// Open the local side.
    fn open(&self);
    /// Close the local side.
    fn close(&self);
    /// Local source address.
    fn source(&self) -> Option<String>;
    /// Set the local source address.
    fn set_source(&self, address: Option<&str>);
    /// Local target address.
    fn target(&self) -> Option<String>;
    /// Set the local target address.
    fn set_target(&self, address: Option<&str>);
    /// Source address announced by the peer.
    fn remote_source(&self) -> Option<String>;
    /// Target address announced by the peer.
    fn remote_target(&self) -> Option<String>;
    /// Drain flag last announced by the peer.
    fn drain(&self) -> bool;
    /// Move past the current delivery. Returns `false` if there was none.
    fn advance(&self) -> bool;
    /// Grant `credit` additional transfers to the peer.
    fn flow(&self, credit: u32);
    /// The delivery currently being read or written, if any.
    fn current(&self) -> Option<Arc<dyn TransportDelivery>>;
    /// Start a new outgoing delivery tagged `tag`.
    fn delivery(&self, tag: &[u8]) -> Option<Arc<dyn TransportDelivery>>;
}

/// Delivery owned by the protocol engine.
pub trait TransportDelivery: Send + Sync {
    /// Identity of the delivery.
    fn key(&self) -> DeliveryKey;
    /// Link carrying the delivery.
    fn link(&self) -> Arc<dyn TransportLink>;
    /// Delivery tag.
    fn tag(&self) -> Vec<u8>;
    /// Incoming data is available.
    fn readable(&self) -> bool;
    /// The peer updated the remote state since the flag was last cleared.
    fn updated(&self) -> bool;
    /// Clear the updated flag.
    fn clear(&self);
    /// Apply a local disposition.
    fn update(&self, disposition: Disposition);
    /// Settle locally.
    fn settle(&self);
    /// The peer has settled.
    fn remote_settled(&self) -> bool;
    /// Disposition last announced by the peer.
    fn remote_state(&self) -> Disposition;
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(EndpointState::new(Phase::Active, Phase::Active), true, false)]
    #[case(EndpointState::new(Phase::Active, Phase::Closed), false, true)]
    #[case(EndpointState::new(Phase::Active, Phase::Uninit), false, false)]
    #[case(EndpointState::new(Phase::Closed, Phase::Closed), false, false)]
    fn endpoint_state_predicates(
        #[case] state: EndpointState,
        #[case] fully_active: bool,
        #[case] remote_closing: bool,
    ) {
        assert_eq!(state.is_fully_active(), fully_active);
        assert_eq!(state.is_remote_closing(), remote_closing);
    }

    #[test]
    fn none_disposition_is_zero() {
        assert!(Disposition::NONE.is_none());
        assert!(!Disposition::REJECTED.is_none());
        assert_eq!(Disposition::from_code(0x24), Disposition::ACCEPTED);
    }
}
