//! Utilities for driving an [`amqp_container::Container`] against the
//! in-memory protocol engine during tests.
//!
//! [`Harness`] wires one connection to a simulated peer,
//! [`RecordingNodeType`] records every hook the container invokes, and
//! [`logger`] captures log output.

pub mod fixture;
pub mod logging;
pub mod recorder;

pub use fixture::{Harness, harness};
pub use logging::{LoggerHandle, logger};
pub use recorder::{Call, RecordingNodeType};
