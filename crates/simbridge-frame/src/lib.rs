//! Wire protocol for the simulator bridge.
//!
//! Every transmission is one XML envelope written in a single send:
//!
//! ```text
//! <Message>
//!   <Event Name="Subscribe">EgoVehicle/speed</Event>
//!   <Event Name="SetUpdateInterval">100</Event>
//! </Message>
//! ```
//!
//! There is no length prefix. [`StreamFramer`] recovers envelope boundaries
//! from the byte stream by watching for the closing tag once the peer goes
//! quiet, and [`MessageCodec`] turns `SubscribedValues` envelopes into
//! [`TelemetryFrame`]s expressed in map-grid units.

pub mod codec;
pub mod command;
pub mod envelope;
pub mod error;
pub mod framer;
pub mod grid;
pub mod telemetry;
pub mod writer;

#[cfg(feature = "async")]
pub mod async_codec;

pub use codec::{
    encode_command, encode_control, encode_startup, encode_vehicle_control, MessageCodec,
};
pub use command::{Command, ControlCommand, VehicleControl};
pub use envelope::{encode_envelope, parse_envelope, EnvelopeBuilder, Event, CLOSE_TAG, OPEN_TAG};
pub use error::{DecodeError, FrameError, Result};
pub use framer::{FramerConfig, FramerCore, FramerStats, LoopExit, StreamFramer};
pub use grid::MapGeometry;
pub use telemetry::{Obstacle, Pedestrian, TelemetryFrame};
pub use writer::MessageWriter;

#[cfg(feature = "async")]
pub use async_codec::EnvelopeCodec;
