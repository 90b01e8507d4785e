/// Errors that can occur in bridge and link operations.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] simbridge_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] simbridge_frame::FrameError),

    /// No peer is attached.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// A blocking call gave up waiting.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The bridge or link was shut down.
    #[error("shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, PeerError>;
