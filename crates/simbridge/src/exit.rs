use std::fmt;
use std::io;

use simbridge::ConfigError;
use simbridge_eval::EvalError;
use simbridge_frame::FrameError;
use simbridge_peer::PeerError;
use simbridge_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::AddrInUse => TRANSPORT_ERROR,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::Decode(_) => CliError::new(DATA_INVALID, format!("{context}: {err}")),
        FrameError::ConnectionClosed | FrameError::Cancelled => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        PeerError::Frame(err) => frame_error(context, err),
        PeerError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        PeerError::Disconnected(_) | PeerError::Shutdown => {
            CliError::new(FAILURE, format!("{context}: {err}"))
        }
    }
}

pub fn eval_error(context: &str, err: EvalError) -> CliError {
    match err {
        EvalError::Io(source) => io_error(context, source),
        EvalError::Json(_) | EvalError::EmptyEpisode | EvalError::Misaligned { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn config_error(err: ConfigError) -> CliError {
    match err {
        ConfigError::Io { source, path } => {
            io_error(&format!("config {}", path.display()), source)
        }
        ConfigError::Json { .. } | ConfigError::Invalid(_) => {
            CliError::new(USAGE, format!("config: {err}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connection_is_transport_error() {
        let err = peer_error(
            "connect failed",
            PeerError::Transport(TransportError::Io(io::Error::from(
                io::ErrorKind::ConnectionRefused,
            ))),
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
        assert!(err.message.starts_with("connect failed"));
    }

    #[test]
    fn empty_episode_is_data_invalid() {
        assert_eq!(eval_error("evaluate", EvalError::EmptyEpisode).code, DATA_INVALID);
        let misaligned = EvalError::Misaligned {
            states: 3,
            actions: 2,
        };
        assert_eq!(eval_error("evaluate", misaligned).code, DATA_INVALID);
    }

    #[test]
    fn missing_config_is_usage() {
        let err = config_error(ConfigError::Io {
            path: "/missing.json".into(),
            source: io::Error::from(io::ErrorKind::NotFound),
        });
        assert_eq!(err.code, USAGE);
        assert!(err.message.contains("/missing.json"));
    }
}
