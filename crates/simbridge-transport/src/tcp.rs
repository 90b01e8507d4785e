use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, TransportError};
use crate::stream::BridgeStream;

/// TCP transport.
///
/// The listener runs in non-blocking mode so the accept loop can observe a
/// [`CancelToken`] between polls; accepted streams are switched back to
/// blocking mode and paced by read deadlines instead.
pub struct TcpTransport {
    listener: TcpListener,
    local_addr: SocketAddr,
    accept_poll: Duration,
}

impl TcpTransport {
    /// Default interval between accept polls.
    pub const DEFAULT_ACCEPT_POLL: Duration = Duration::from_millis(50);

    /// Bind and listen on `addr` (e.g. `127.0.0.1:5555`, or port 0 for an
    /// ephemeral port).
    pub fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| TransportError::bind(addr, e))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| TransportError::bind(addr, e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::bind(addr, e))?;

        info!(%local_addr, "listening on tcp");

        Ok(Self {
            listener,
            local_addr,
            accept_poll: Self::DEFAULT_ACCEPT_POLL,
        })
    }

    /// Override the accept poll interval.
    pub fn with_accept_poll(mut self, interval: Duration) -> Self {
        self.accept_poll = interval;
        self
    }

    /// Accept the next connection, polling until one arrives or `cancel` fires.
    ///
    /// Returns `Ok(None)` when cancelled.
    pub fn accept(&self, cancel: &CancelToken) -> Result<Option<BridgeStream>> {
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false).map_err(TransportError::Accept)?;
                    debug!(%peer, "accepted connection");
                    return Ok(Some(BridgeStream::from_tcp(stream)));
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if cancel.wait_timeout(self.accept_poll) {
                        return Ok(None);
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Accept(err)),
            }
        }
    }

    /// Connect to a listening peer, trying every resolved address in turn.
    pub fn connect(addr: &str, timeout: Option<Duration>) -> Result<BridgeStream> {
        let candidates: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.to_string(),
                source: e,
            })?
            .collect();

        let mut last_err = None;
        for candidate in &candidates {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(candidate, timeout),
                None => TcpStream::connect(candidate),
            };
            match attempt {
                Ok(stream) => {
                    debug!(peer = %candidate, "connected over tcp");
                    return Ok(BridgeStream::from_tcp(stream));
                }
                Err(err) => last_err = Some(TransportError::connect(candidate, err)),
            }
        }

        Err(last_err.unwrap_or_else(|| TransportError::Unresolved(addr.to_string())))
    }

    /// The address this transport is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_bind_accept_connect() {
        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let handle = std::thread::spawn(move || {
            let mut client = TcpTransport::connect(&addr, Some(Duration::from_secs(2))).unwrap();
            client.write_all(b"hello").unwrap();
        });

        let cancel = CancelToken::new();
        let mut server = listener.accept(&cancel).unwrap().expect("a peer connects");
        let mut buf = [0u8; 5];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");

        handle.join().unwrap();
    }

    #[test]
    fn test_accept_returns_none_when_cancelled() {
        let listener = TcpTransport::bind("127.0.0.1:0")
            .unwrap()
            .with_accept_poll(Duration::from_millis(5));
        let cancel = CancelToken::new();

        let trigger = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                cancel.cancel();
            })
        };

        let start = Instant::now();
        assert!(listener.accept(&cancel).unwrap().is_none());
        assert!(start.elapsed() < Duration::from_secs(5));
        trigger.join().unwrap();
    }

    #[test]
    fn test_connect_refused() {
        let addr = {
            let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
            listener.local_addr().to_string()
        };
        let result = TcpTransport::connect(&addr, Some(Duration::from_millis(200)));
        assert!(matches!(result, Err(TransportError::Connect { .. })));
    }

    #[test]
    fn test_bind_rejects_garbage_address() {
        let result = TcpTransport::bind("not-an-address");
        assert!(matches!(result, Err(TransportError::Bind { .. })));
    }

    #[test]
    fn test_read_deadline_reports_idle() {
        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();
        let _client = TcpTransport::connect(&addr, None).unwrap();

        let cancel = CancelToken::new();
        let mut server = listener.accept(&cancel).unwrap().unwrap();
        server
            .set_read_timeout(Some(Duration::from_millis(10)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = server.read(&mut buf).unwrap_err();
        assert!(crate::stream::is_idle(&err));
    }
}
