//! Container configuration.
//!
//! The values here apply to every connection driven by a container. They are
//! fixed for the lifetime of the container and are not tied to any node type.

use serde::Deserialize;

/// Incoming window granted to every session the container opens.
pub const DEFAULT_SESSION_WINDOW: usize = 1_000_000;

/// Credit granted to a link when an unroutable transfer is rejected.
pub const DEFAULT_REJECT_CREDIT: u32 = 1;

/// Settings shared by all connections of a [`Container`](crate::Container).
///
/// # Examples
///
/// ```
/// use amqp_container::ContainerConfig;
///
/// let config = ContainerConfig::default().with_session_window(64 * 1024);
/// assert_eq!(config.session_window, 65_536);
/// assert_eq!(config.reject_credit, 1);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ContainerConfig {
    /// Incoming capacity applied to sessions before they are opened.
    pub session_window: usize,
    /// Credit issued on a link after rejecting a transfer nobody can route.
    pub reject_credit: u32,
}

impl ContainerConfig {
    /// Replace the session window.
    #[must_use]
    pub fn with_session_window(mut self, window: usize) -> Self {
        self.session_window = window;
        self
    }

    /// Replace the credit granted after a rejection.
    #[must_use]
    pub fn with_reject_credit(mut self, credit: u32) -> Self {
        self.reject_credit = credit;
        self
    }
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            session_window: DEFAULT_SESSION_WINDOW,
            reject_credit: DEFAULT_REJECT_CREDIT,
        }
    }
}
