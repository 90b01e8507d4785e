//! Duplex, line-oriented control channel to one external process at a time.
//!
//! The bridge owns a TCP listener. Each accepted connection gets its own
//! sender and receiver worker and its own pair of [`Mailbox`]es; accepting a
//! new peer discards the previous connection wholesale. Callers use
//! [`ControlBridge::send`] and [`ControlBridge::receive`] from any thread and
//! never touch the socket.

use std::io::{ErrorKind, Read};
use std::net::SocketAddr;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use simbridge_frame::MessageWriter;
use simbridge_transport::{is_idle, is_reset, BridgeStream, CancelToken, TcpTransport};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::mailbox::{Mailbox, PutError, TakeError};

/// Tuning for [`ControlBridge`].
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Read deadline for the receiver worker.
    pub poll_interval: Duration,
    /// Pause before retrying a failed read on the same connection.
    pub read_retry_delay: Duration,
    /// Consecutive read failures after which the connection is discarded.
    pub max_read_failures: u32,
    /// Interval between accept polls.
    pub accept_poll_interval: Duration,
    /// Write deadline for the sender worker.
    pub write_timeout: Option<Duration>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            read_retry_delay: Duration::from_millis(500),
            max_read_failures: 5,
            accept_poll_interval: TcpTransport::DEFAULT_ACCEPT_POLL,
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

struct Connection {
    id: u64,
    peer: Option<SocketAddr>,
    stream: BridgeStream,
    outbound: Mailbox<String>,
    inbound: Mailbox<String>,
    cancel: CancelToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    fn new(id: u64, stream: BridgeStream) -> Self {
        Self {
            id,
            peer: stream.peer_addr(),
            stream,
            outbound: Mailbox::new(),
            inbound: Mailbox::new(),
            cancel: CancelToken::new(),
            workers: Mutex::new(Vec::with_capacity(2)),
        }
    }

    fn close(&self) {
        self.cancel.cancel();
        self.outbound.close();
        self.inbound.close();
        if let Err(err) = self.stream.shutdown() {
            debug!(conn = self.id, error = %err, "control socket shutdown failed");
        }
    }

    fn join(&self) {
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for worker in workers {
            if worker.join().is_err() {
                warn!(conn = self.id, "control worker panicked");
            }
        }
    }
}

struct Shared {
    config: BridgeConfig,
    cancel: CancelToken,
    current: Mutex<Option<Arc<Connection>>>,
    changed: Condvar,
    /// Outbound message accepted by `send` but never claimed by its
    /// connection's sender; it goes out first on the next connection.
    stranded: Mutex<Option<String>>,
}

impl Shared {
    fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            cancel: CancelToken::new(),
            current: Mutex::new(None),
            changed: Condvar::new(),
            stranded: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn install(&self, conn: Arc<Connection>) {
        *self.lock() = Some(conn);
        self.changed.notify_all();
    }

    /// Wake waiters after a state change made outside `current`'s lock.
    fn wake(&self) {
        drop(self.lock());
        self.changed.notify_all();
    }

    /// Detach `conn` if it is still current, then close it. Idempotent.
    fn discard(&self, conn: &Connection) {
        {
            let mut current = self.lock();
            if current.as_ref().is_some_and(|c| c.id == conn.id) {
                *current = None;
            }
        }
        conn.close();
        if let Some(message) = conn.outbound.try_take() {
            debug!(conn = conn.id, "keeping unsent message for the next connection");
            *self.stranded.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
        }
        self.changed.notify_all();
    }

    fn take_stranded(&self) -> Option<String> {
        self.stranded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Block until a connection is attached.
    fn wait_connection(
        &self,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<Arc<Connection>> {
        let mut current = self.lock();
        loop {
            if self.cancel.is_cancelled() {
                return Err(PeerError::Shutdown);
            }
            if let Some(conn) = current.as_ref() {
                return Ok(Arc::clone(conn));
            }
            current = match deadline {
                None => self
                    .changed
                    .wait(current)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline
                        .checked_duration_since(Instant::now())
                        .filter(|d| !d.is_zero())
                        .ok_or_else(|| timed_out(timeout))?;
                    self.changed
                        .wait_timeout(current, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

fn timed_out(timeout: Option<Duration>) -> PeerError {
    PeerError::Timeout(timeout.unwrap_or_default())
}

/// Line-oriented control channel; see the module docs.
pub struct ControlBridge {
    shared: Arc<Shared>,
    local_addr: SocketAddr,
    accept_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ControlBridge {
    /// Bind `addr` and start the accept loop.
    pub fn bind(addr: &str, config: BridgeConfig) -> Result<Self> {
        let transport = TcpTransport::bind(addr)?.with_accept_poll(config.accept_poll_interval);
        let local_addr = transport.local_addr();

        let shared = Arc::new(Shared::new(config));

        let accept_thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("simbridge-accept".into())
                .spawn(move || accept_loop(transport, shared))
                .map_err(|err| PeerError::Transport(err.into()))?
        };

        Ok(Self {
            shared,
            local_addr,
            accept_thread: Mutex::new(Some(accept_thread)),
        })
    }

    /// Bound listener address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True while a peer is attached. Never blocks on I/O.
    ///
    /// A hang-up is only noticed by the receiver worker, which stops reading
    /// while an unread line waits in the inbound slot. Until the caller takes
    /// that line, a peer that already closed still counts as connected.
    pub fn connected(&self) -> bool {
        self.shared.lock().is_some()
    }

    /// Address of the attached peer, if any.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.shared.lock().as_ref().and_then(|conn| conn.peer)
    }

    /// Block until a peer is attached or `timeout` elapses.
    pub fn wait_connected(&self, timeout: Duration) -> Result<()> {
        self.shared
            .wait_connection(Some(Instant::now() + timeout), Some(timeout))
            .map(|_| ())
    }

    /// Queue `message` for the attached peer.
    ///
    /// Blocks until a peer is attached and its outbound slot is free. If the
    /// connection is replaced while waiting, the message goes to the new one.
    pub fn send(&self, message: impl Into<String>) -> Result<()> {
        self.send_until(message.into(), None)
    }

    pub fn send_timeout(&self, message: impl Into<String>, timeout: Duration) -> Result<()> {
        self.send_until(message.into(), Some(timeout))
    }

    /// Next line from the attached peer, without its terminator.
    pub fn receive(&self) -> Result<String> {
        self.receive_until(None)
    }

    pub fn receive_timeout(&self, timeout: Duration) -> Result<String> {
        self.receive_until(Some(timeout))
    }

    /// Stop accepting, discard the current connection and join every worker.
    pub fn shutdown(&self) -> Result<()> {
        self.shared.cancel.cancel();
        self.shared.wake();

        let handle = self
            .accept_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.join().map_err(|_| {
                PeerError::Disconnected("accept loop panicked".to_string())
            })?;
        }
        Ok(())
    }

    fn send_until(&self, mut message: String, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let conn = self.shared.wait_connection(deadline, timeout)?;
            match conn.outbound.put_until(message, deadline) {
                Ok(()) => return Ok(()),
                Err(PutError::Closed(returned)) => {
                    debug!(conn = conn.id, "connection dropped while sending; waiting for next");
                    message = returned;
                    self.wait_detached(&conn, deadline, timeout)?;
                }
                Err(PutError::TimedOut(_)) => return Err(timed_out(timeout)),
            }
        }
    }

    fn receive_until(&self, timeout: Option<Duration>) -> Result<String> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            let conn = self.shared.wait_connection(deadline, timeout)?;
            match conn.inbound.take_until(deadline) {
                Ok(line) => return Ok(line),
                Err(TakeError::Closed) => self.wait_detached(&conn, deadline, timeout)?,
                Err(TakeError::TimedOut) => return Err(timed_out(timeout)),
            }
        }
    }

    /// Wait until `conn` is no longer the current connection.
    fn wait_detached(
        &self,
        conn: &Connection,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mut current = self.shared.lock();
        while current.as_ref().is_some_and(|c| c.id == conn.id) {
            if self.shared.cancel.is_cancelled() {
                return Err(PeerError::Shutdown);
            }
            current = match deadline {
                None => self
                    .shared
                    .changed
                    .wait(current)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let remaining = deadline
                        .checked_duration_since(Instant::now())
                        .filter(|d| !d.is_zero())
                        .ok_or_else(|| timed_out(timeout))?;
                    self.shared
                        .changed
                        .wait_timeout(current, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        Ok(())
    }
}

impl Drop for ControlBridge {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(error = %err, "control bridge shutdown failed");
        }
    }
}

fn accept_loop(transport: TcpTransport, shared: Arc<Shared>) {
    let mut next_id = 1u64;
    let mut previous: Option<Arc<Connection>> = None;

    loop {
        let stream = match transport.accept(&shared.cancel) {
            Ok(Some(stream)) => stream,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "accept failed");
                if shared.cancel.wait_timeout(shared.config.accept_poll_interval) {
                    break;
                }
                continue;
            }
        };

        let id = next_id;
        next_id += 1;

        let conn = match start_connection(id, stream, &shared) {
            Ok(conn) => conn,
            Err(err) => {
                warn!(conn = id, error = %err, "failed to start control connection");
                continue;
            }
        };
        info!(conn = id, peer = ?conn.peer, "control peer attached");

        if let Some(old) = previous.replace(conn) {
            debug!(conn = old.id, "discarding previous control connection");
            shared.discard(&old);
            old.join();
        }
    }

    let current = shared.lock().take();
    if let Some(old) = current {
        shared.discard(&old);
    }
    if let Some(old) = previous {
        shared.discard(&old);
        old.join();
    }
    shared.wake();
    debug!("control accept loop stopped");
}

fn start_connection(
    id: u64,
    stream: BridgeStream,
    shared: &Arc<Shared>,
) -> Result<Arc<Connection>> {
    stream.set_read_timeout(Some(shared.config.poll_interval))?;
    stream.set_nodelay(true)?;
    let reader = stream.try_clone()?;
    let writer = MessageWriter::for_stream(stream.try_clone()?, shared.config.write_timeout)?;

    let conn = Arc::new(Connection::new(id, stream));
    if let Some(message) = shared.take_stranded() {
        if let Err(err) = conn.outbound.put(message) {
            warn!(conn = id, "dropping unsent message: {:?}", err.into_inner());
        }
    }

    let sender = {
        let conn = Arc::clone(&conn);
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("simbridge-send-{id}"))
            .spawn(move || {
                send_loop(&conn, writer);
                shared.discard(&conn);
            })
            .map_err(|err| PeerError::Transport(err.into()))?
    };
    let receiver = {
        let conn = Arc::clone(&conn);
        let shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("simbridge-recv-{id}"))
            .spawn(move || {
                receive_loop(&conn, reader, &shared);
                shared.discard(&conn);
            })
            .map_err(|err| PeerError::Transport(err.into()))?
    };
    conn.workers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .extend([sender, receiver]);

    shared.install(Arc::clone(&conn));
    Ok(conn)
}

fn send_loop(conn: &Connection, mut writer: MessageWriter<BridgeStream>) {
    loop {
        let mut message = match conn.outbound.claim() {
            Ok(message) => message,
            Err(_) => break,
        };
        if !message.ends_with('\n') {
            message.push('\n');
        }
        let result = writer.send(&message);
        conn.outbound.release();

        if let Err(err) = result {
            warn!(conn = conn.id, error = %err, "control write failed; dropping connection");
            break;
        }
    }
    debug!(conn = conn.id, "control sender stopped");
}

fn receive_loop(conn: &Connection, mut reader: BridgeStream, shared: &Shared) {
    let mut buf = BytesMut::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut failures = 0u32;

    loop {
        if conn.cancel.is_cancelled() || shared.cancel.is_cancelled() {
            break;
        }

        match reader.read(&mut chunk) {
            Ok(0) => {
                debug!(conn = conn.id, "control peer closed connection");
                break;
            }
            Ok(n) => {
                failures = 0;
                buf.extend_from_slice(&chunk[..n]);
                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line = buf.split_to(pos + 1);
                    let text = String::from_utf8_lossy(&line[..pos])
                        .trim_end_matches('\r')
                        .to_string();
                    if conn.inbound.put(text).is_err() {
                        return;
                    }
                }
            }
            Err(err) if is_idle(&err) || err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                failures += 1;
                warn!(
                    conn = conn.id,
                    error = %err,
                    failures,
                    "control read failed"
                );
                if is_reset(&err) || failures >= shared.config.max_read_failures {
                    break;
                }
                if conn.cancel.wait_timeout(shared.config.read_retry_delay) {
                    break;
                }
            }
        }
    }
    debug!(conn = conn.id, "control receiver stopped");
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    use super::*;

    fn test_config() -> BridgeConfig {
        BridgeConfig {
            poll_interval: Duration::from_millis(10),
            read_retry_delay: Duration::from_millis(10),
            accept_poll_interval: Duration::from_millis(5),
            ..BridgeConfig::default()
        }
    }

    fn bridge() -> ControlBridge {
        ControlBridge::bind("127.0.0.1:0", test_config()).unwrap()
    }

    fn wait_for_peer(bridge: &ControlBridge, client: &TcpStream) {
        let expected = client.local_addr().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.peer_addr() != Some(expected) {
            assert!(Instant::now() < deadline, "bridge never attached {expected}");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn consecutive_sends_arrive_in_order() {
        let bridge = bridge();
        let client = TcpStream::connect(bridge.local_addr()).unwrap();

        bridge.send("A").unwrap();
        bridge.send("B").unwrap();

        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next().unwrap().unwrap(), "A");
        assert_eq!(lines.next().unwrap().unwrap(), "B");
    }

    #[test]
    fn receives_lines_split_across_writes() {
        let bridge = bridge();
        let mut client = TcpStream::connect(bridge.local_addr()).unwrap();

        client.write_all(b"hel").unwrap();
        client.flush().unwrap();
        thread::sleep(Duration::from_millis(30));
        client.write_all(b"lo\r\nworld\n").unwrap();

        assert_eq!(bridge.receive_timeout(Duration::from_secs(5)).unwrap(), "hello");
        assert_eq!(bridge.receive_timeout(Duration::from_secs(5)).unwrap(), "world");
    }

    #[test]
    fn receive_without_peer_times_out() {
        let bridge = bridge();
        assert!(!bridge.connected());
        let err = bridge.receive_timeout(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, PeerError::Timeout(_)));
    }

    #[test]
    fn unsent_message_moves_to_next_connection() {
        let shared = Arc::new(Shared::new(test_config()));
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let first = TcpTransport::connect(&addr, Some(Duration::from_secs(1))).unwrap();
        let _first_remote = listener.accept().unwrap();
        let dropped = Connection::new(1, first);
        dropped.outbound.put("late".to_string()).unwrap();
        shared.discard(&dropped);
        assert!(!dropped.outbound.is_occupied());

        let second = TcpTransport::connect(&addr, Some(Duration::from_secs(1))).unwrap();
        let (remote, _) = listener.accept().unwrap();
        let conn = start_connection(2, second, &shared).unwrap();

        let mut line = String::new();
        BufReader::new(remote).read_line(&mut line).unwrap();
        assert_eq!(line, "late\n");

        shared.discard(&conn);
        conn.join();
    }

    #[test]
    fn new_peer_replaces_old_one() {
        let bridge = bridge();
        let first = TcpStream::connect(bridge.local_addr()).unwrap();
        wait_for_peer(&bridge, &first);

        let second = TcpStream::connect(bridge.local_addr()).unwrap();
        wait_for_peer(&bridge, &second);

        bridge.send("to-second").unwrap();
        let mut lines = BufReader::new(second).lines();
        assert_eq!(lines.next().unwrap().unwrap(), "to-second");

        let mut old = BufReader::new(first);
        let mut rest = String::new();
        assert_eq!(old.read_line(&mut rest).unwrap_or(0), 0);
    }

    #[test]
    fn peer_hangup_detaches_connection() {
        let bridge = bridge();
        let client = TcpStream::connect(bridge.local_addr()).unwrap();
        wait_for_peer(&bridge, &client);
        drop(client);

        let deadline = Instant::now() + Duration::from_secs(5);
        while bridge.connected() {
            assert!(Instant::now() < deadline, "connection never detached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn shutdown_unblocks_receive() {
        let bridge = Arc::new(bridge());
        let waiter = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.receive())
        };

        thread::sleep(Duration::from_millis(30));
        bridge.shutdown().unwrap();

        assert!(matches!(waiter.join().unwrap(), Err(PeerError::Shutdown)));
        assert!(!bridge.connected());
    }

    #[test]
    fn send_blocks_until_peer_attaches() {
        let bridge = Arc::new(bridge());
        let sender = {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || bridge.send("late"))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!sender.is_finished());

        let client = TcpStream::connect(bridge.local_addr()).unwrap();
        sender.join().unwrap().unwrap();
        let mut lines = BufReader::new(client).lines();
        assert_eq!(lines.next().unwrap().unwrap(), "late");
    }
}
