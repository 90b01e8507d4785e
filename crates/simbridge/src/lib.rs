//! Real-time bridge between a driving simulator and an external control agent.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP transport and cancellation tokens
//! - [`frame`]: XML envelope codec, telemetry model and stream framing
//! - [`peer`]: control bridge and reconnecting telemetry link (behind `peer` feature)
//! - [`eval`]: episode recording and safety scoring
//! - [`config`]: JSON configuration and the [`BridgeContext`] built from it

pub mod config;

pub use config::{BridgeContext, ConfigError, SimConfig};

/// Re-export transport types.
pub mod transport {
    pub use simbridge_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use simbridge_frame::*;
}

/// Re-export peer types (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use simbridge_peer::*;
}

/// Re-export evaluation types.
pub mod eval {
    pub use simbridge_eval::*;
}
