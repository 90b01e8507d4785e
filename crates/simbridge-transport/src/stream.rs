use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::Result;

/// A connected bridge stream: implements Read + Write.
///
/// This is the fundamental I/O type returned by [`TcpTransport`](crate::TcpTransport).
/// Reads are expected to run with a read deadline (see
/// [`set_read_timeout`](Self::set_read_timeout)) so no worker blocks forever on
/// a stalled peer.
pub struct BridgeStream {
    inner: TcpStream,
    peer: Option<SocketAddr>,
}

impl Read for BridgeStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for BridgeStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

impl BridgeStream {
    pub(crate) fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        Self {
            inner: stream,
            peer,
        }
    }

    /// Set read deadline on the underlying socket.
    ///
    /// A read that hits the deadline fails with `WouldBlock` or `TimedOut`
    /// depending on the platform; use [`is_idle`] to classify it.
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_read_timeout(timeout).map_err(Into::into)
    }

    /// Set write deadline on the underlying socket.
    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.set_write_timeout(timeout).map_err(Into::into)
    }

    /// Disable Nagle's algorithm; control messages are small and latency bound.
    pub fn set_nodelay(&self, nodelay: bool) -> Result<()> {
        self.inner.set_nodelay(nodelay).map_err(Into::into)
    }

    /// Try to clone this stream (creates a new file descriptor).
    pub fn try_clone(&self) -> Result<Self> {
        let cloned = self.inner.try_clone()?;
        Ok(Self {
            inner: cloned,
            peer: self.peer,
        })
    }

    /// Shut down both directions. Unblocks any thread reading a clone.
    pub fn shutdown(&self) -> Result<()> {
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Already closed by the peer.
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Address of the connected peer, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl std::fmt::Debug for BridgeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeStream")
            .field("type", &"tcp")
            .field("peer", &self.peer)
            .finish()
    }
}

/// True when a read failed only because its deadline passed with no data.
pub fn is_idle(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// True when the peer is gone and the connection cannot be reused.
pub fn is_reset(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use std::io::Error;

    use super::*;

    #[test]
    fn idle_classification() {
        assert!(is_idle(&Error::from(ErrorKind::WouldBlock)));
        assert!(is_idle(&Error::from(ErrorKind::TimedOut)));
        assert!(!is_idle(&Error::from(ErrorKind::ConnectionReset)));
    }

    #[test]
    fn reset_classification() {
        assert!(is_reset(&Error::from(ErrorKind::ConnectionReset)));
        assert!(is_reset(&Error::from(ErrorKind::BrokenPipe)));
        assert!(!is_reset(&Error::from(ErrorKind::WouldBlock)));
        assert!(!is_reset(&Error::from(ErrorKind::InvalidData)));
    }
}
