//! Connection management for the simulator bridge.
//!
//! Two long-lived endpoints live here:
//! - [`ControlBridge`]: a TCP listener serving one line-oriented control peer
//!   at a time, with blocking single-slot [`Mailbox`]es between the socket
//!   workers and the caller.
//! - [`TelemetryLink`]: the reconnecting client that subscribes to simulator
//!   telemetry and forwards vehicle control.

pub mod bridge;
pub mod error;
pub mod link;
pub mod mailbox;

pub use bridge::{BridgeConfig, ControlBridge};
pub use error::{PeerError, Result};
pub use link::{LinkConfig, LinkController, TelemetryLink};
pub use mailbox::{Mailbox, PutError, TakeError};
