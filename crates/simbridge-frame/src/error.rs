/// Errors raised while turning an envelope into a [`TelemetryFrame`](crate::TelemetryFrame).
///
/// The framer treats every variant as a dropped frame, never as a fatal condition.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is not well-formed XML.
    #[error("malformed envelope: {0}")]
    Xml(#[from] roxmltree::Error),

    /// The document root is not a `<Message>` envelope.
    #[error("unexpected root element <{0}>")]
    UnexpectedRoot(String),

    /// A node the telemetry tree requires is absent.
    #[error("missing required node {0}")]
    MissingNode(&'static str),

    /// A numeric field did not parse as floating point.
    #[error("field {field} is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// A structured field (boolean, coordinate list, command) is malformed.
    #[error("field {field} is malformed: {value:?}")]
    InvalidField { field: &'static str, value: String },
}

/// Errors that can occur while framing, encoding or decoding messages.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// An I/O error occurred while reading or writing messages.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream reached end-of-file.
    #[error("connection closed")]
    ConnectionClosed,

    /// The loop was cancelled by its owner.
    #[error("framing cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, FrameError>;
