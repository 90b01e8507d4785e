//! TCP transport for the simulator bridge.
//!
//! This is the lowest layer of simbridge. It provides:
//! - [`TcpTransport`]: bind/accept/connect over loopback or network TCP
//! - [`BridgeStream`]: a connected stream with read/write deadlines
//! - [`CancelToken`]: the cancellation signal every loop above this layer takes
//!
//! Everything else builds on top of these types.

pub mod cancel;
pub mod error;
pub mod stream;
pub mod tcp;

pub use cancel::CancelToken;
pub use error::{Result, TransportError};
pub use stream::{is_idle, is_reset, BridgeStream};
pub use tcp::TcpTransport;
