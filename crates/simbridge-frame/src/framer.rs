use std::io::{ErrorKind, Read};
use std::ops::ControlFlow;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use simbridge_transport::{is_idle, is_reset, BridgeStream, CancelToken};
use tracing::{debug, trace, warn};

use crate::codec::MessageCodec;
use crate::envelope::{CLOSE_TAG, OPEN_TAG};
use crate::error::{FrameError, Result};
use crate::telemetry::TelemetryFrame;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Default read deadline / idle backoff.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Default cap on buffered bytes without a complete envelope: 4 MiB.
pub const DEFAULT_MAX_BUFFER: usize = 4 * 1024 * 1024;

/// Configuration for the stream framer.
#[derive(Debug, Clone, PartialEq)]
pub struct FramerConfig {
    /// How long a read may wait before the framer treats the peer as quiet.
    pub poll_interval: Duration,
    /// Buffered bytes allowed before the framer forces an extraction.
    pub max_buffer: usize,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }
}

/// Counters kept across the framer's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Envelopes extracted from the stream.
    pub messages: u64,
    /// Frames handed to the consumer.
    pub frames: u64,
    /// Envelopes dropped because they failed to decode.
    pub undecodable: u64,
    /// Frames dropped because the ego position was off the map.
    pub out_of_bounds: u64,
}

/// Why [`StreamFramer::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// End-of-stream or transport reset. The owner should reconnect.
    ConnectionEnded,
    /// The cancel token fired.
    Cancelled,
    /// The consumer asked to stop.
    Stopped,
}

/// Reassembles complete envelopes from an unframed byte stream.
///
/// The protocol has no length prefix: the producer writes one whole envelope
/// per send. The framer appends every chunk it reads, and once a read comes
/// back empty-handed (the peer went quiet) it checks whether the trimmed
/// buffer ends with `</Message>`. If so, the text from the last `<Message>`
/// to the end is one message and the buffer is cleared. Anything before that
/// opening tag is a stale snapshot and is dropped with it.
pub struct FramerCore {
    buf: BytesMut,
    max_buffer: usize,
}

impl FramerCore {
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            max_buffer,
        }
    }

    /// Append freshly read bytes.
    ///
    /// Returns a message when the buffer outgrew its cap; the buffer is
    /// cleared either way in that case.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.buf.extend_from_slice(chunk);
        if self.buf.len() <= self.max_buffer {
            return None;
        }

        let message = self.take_message();
        if message.is_none() {
            warn!(
                buffered = self.buf.len(),
                max = self.max_buffer,
                "discarding oversized buffer without a complete envelope"
            );
            self.buf.clear();
        }
        message
    }

    /// Extract the buffered envelope if the buffer currently ends with one.
    pub fn take_message(&mut self) -> Option<String> {
        let end = self.buf.iter().rposition(|b| !b.is_ascii_whitespace())? + 1;
        let body = &self.buf[..end];
        if !body.ends_with(CLOSE_TAG.as_bytes()) {
            return None;
        }

        let message = rfind(body, OPEN_TAG.as_bytes())
            .map(|start| String::from_utf8_lossy(&body[start..]).into_owned());
        if message.is_none() {
            warn!(
                buffered = self.buf.len(),
                "closing tag without opening tag; discarding buffer"
            );
        }
        self.buf.clear();
        message
    }

    /// Bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Reads telemetry frames from any `Read` stream.
///
/// Reads are expected to be bounded by a deadline (see
/// [`StreamFramer::for_stream`]); a read that times out or would block is the
/// "no bytes available" signal that triggers envelope extraction.
pub struct StreamFramer<T> {
    inner: T,
    core: FramerCore,
    codec: MessageCodec,
    config: FramerConfig,
    stats: FramerStats,
    eof: bool,
}

impl<T: Read> StreamFramer<T> {
    /// Create a new framer with default configuration.
    pub fn new(inner: T, codec: MessageCodec) -> Self {
        Self::with_config(inner, codec, FramerConfig::default())
    }

    /// Create a new framer with explicit configuration.
    pub fn with_config(inner: T, codec: MessageCodec, config: FramerConfig) -> Self {
        Self {
            inner,
            core: FramerCore::new(config.max_buffer),
            codec,
            config,
            stats: FramerStats::default(),
            eof: false,
        }
    }

    /// Read the next complete envelope.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` once the stream is at EOF
    /// and no complete envelope remains buffered.
    pub fn next_message(&mut self, cancel: &CancelToken) -> Result<String> {
        let mut chunk = [0u8; READ_CHUNK_SIZE];
        loop {
            if cancel.is_cancelled() {
                return Err(FrameError::Cancelled);
            }
            if self.eof {
                return match self.core.take_message() {
                    Some(message) => Ok(self.count(message)),
                    None => Err(FrameError::ConnectionClosed),
                };
            }

            let started = Instant::now();
            match self.inner.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(n) => {
                    trace!(bytes = n, "read chunk");
                    if let Some(message) = self.core.push(&chunk[..n]) {
                        return Ok(self.count(message));
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_idle(&err) => {
                    if let Some(message) = self.core.take_message() {
                        return Ok(self.count(message));
                    }
                    // Non-blocking readers return immediately; pace them.
                    let waited = started.elapsed();
                    if waited < self.config.poll_interval
                        && cancel.wait_timeout(self.config.poll_interval - waited)
                    {
                        return Err(FrameError::Cancelled);
                    }
                }
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Read the next frame that decodes and lies on the map.
    ///
    /// Undecodable envelopes are logged and skipped; off-map frames are
    /// skipped silently.
    pub fn next_frame(&mut self, cancel: &CancelToken) -> Result<TelemetryFrame> {
        loop {
            let message = self.next_message(cancel)?;
            let frame = match self.codec.decode_telemetry(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    self.stats.undecodable += 1;
                    warn!(error = %err, "dropping undecodable telemetry message");
                    continue;
                }
            };
            if !self.codec.in_bounds(&frame) {
                self.stats.out_of_bounds += 1;
                trace!(x = frame.x, z = frame.z, "dropping off-map frame");
                continue;
            }
            self.stats.frames += 1;
            return Ok(frame);
        }
    }

    /// Feed frames to `sink` until the connection ends, `cancel` fires, or the
    /// sink breaks.
    ///
    /// Transport failures end the loop with [`LoopExit::ConnectionEnded`];
    /// they are never surfaced as errors.
    pub fn run<F>(&mut self, cancel: &CancelToken, mut sink: F) -> LoopExit
    where
        F: FnMut(TelemetryFrame) -> ControlFlow<()>,
    {
        loop {
            match self.next_frame(cancel) {
                Ok(frame) => {
                    if sink(frame).is_break() {
                        return LoopExit::Stopped;
                    }
                }
                Err(FrameError::Cancelled) => return LoopExit::Cancelled,
                Err(FrameError::ConnectionClosed) => {
                    debug!("telemetry stream closed");
                    return LoopExit::ConnectionEnded;
                }
                Err(FrameError::Io(err)) if is_reset(&err) => {
                    debug!(error = %err, "telemetry connection reset");
                    return LoopExit::ConnectionEnded;
                }
                Err(err) => {
                    warn!(error = %err, "telemetry read failed");
                    return LoopExit::ConnectionEnded;
                }
            }
        }
    }

    fn count(&mut self, message: String) -> String {
        self.stats.messages += 1;
        message
    }

    /// Counters since construction.
    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the framer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current framer configuration.
    pub fn config(&self) -> &FramerConfig {
        &self.config
    }
}

impl StreamFramer<BridgeStream> {
    /// Create a framer for a socket and apply the poll interval as its read
    /// deadline.
    pub fn for_stream(
        inner: BridgeStream,
        codec: MessageCodec,
        config: FramerConfig,
    ) -> Result<Self> {
        inner
            .set_read_timeout(Some(config.poll_interval))
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, codec, config))
    }
}

pub(crate) fn transport_to_frame_error(err: simbridge_transport::TransportError) -> FrameError {
    match err {
        simbridge_transport::TransportError::Io(io)
        | simbridge_transport::TransportError::Accept(io) => FrameError::Io(io),
        simbridge_transport::TransportError::Bind { source, .. }
        | simbridge_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
        other => FrameError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::grid::MapGeometry;

    fn codec() -> MessageCodec {
        MessageCodec::new(MapGeometry::new(800.0, 800.0, 2.0))
    }

    fn telemetry(x: f64) -> String {
        codec().encode_telemetry(
            &TelemetryFrame::ego(x, 400.0, 0.0, 3.0).with_pedestrian(100.0, 100.0, 1.0),
        )
    }

    /// Yields fixed-size chunks, then EOF.
    struct ChunkedReader {
        bytes: Vec<u8>,
        pos: usize,
        chunk: usize,
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() {
                return Ok(0);
            }
            let n = self.chunk.min(buf.len()).min(self.bytes.len() - self.pos);
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    /// Yields scripted reads: `Some(bytes)` as data, `None` as would-block.
    struct ScriptedReader {
        script: std::collections::VecDeque<Option<Vec<u8>>>,
    }

    impl ScriptedReader {
        fn new(script: Vec<Option<Vec<u8>>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl Read for ScriptedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.script.pop_front() {
                None => Ok(0),
                Some(None) => Err(std::io::Error::from(ErrorKind::WouldBlock)),
                Some(Some(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
            }
        }
    }

    fn fast_config() -> FramerConfig {
        FramerConfig {
            poll_interval: Duration::from_millis(1),
            ..FramerConfig::default()
        }
    }

    fn drain<R: Read>(framer: &mut StreamFramer<R>) -> Vec<TelemetryFrame> {
        let cancel = CancelToken::new();
        let mut frames = Vec::new();
        let exit = framer.run(&cancel, |frame| {
            frames.push(frame);
            ControlFlow::Continue(())
        });
        assert_eq!(exit, LoopExit::ConnectionEnded);
        frames
    }

    #[test]
    fn chunk_size_does_not_change_frames() {
        let wire = telemetry(550.0).into_bytes();
        let whole = wire.len();

        let results: Vec<Vec<TelemetryFrame>> = [1, 7, whole]
            .into_iter()
            .map(|chunk| {
                let reader = ChunkedReader {
                    bytes: wire.clone(),
                    pos: 0,
                    chunk,
                };
                drain(&mut StreamFramer::new(reader, codec()))
            })
            .collect();

        assert_eq!(results[0].len(), 1);
        assert_eq!(results[0][0].x, 550.0);
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn chunk_size_does_not_change_frames_across_quiet_gaps() {
        let messages = [telemetry(100.0), telemetry(200.0), telemetry(300.0)];

        let framed: Vec<Vec<f64>> = [1, 7, usize::MAX]
            .into_iter()
            .map(|chunk| {
                let mut script = Vec::new();
                for message in &messages {
                    for piece in message.as_bytes().chunks(chunk.min(message.len())) {
                        script.push(Some(piece.to_vec()));
                    }
                    script.push(None);
                }
                let mut framer =
                    StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());
                drain(&mut framer).into_iter().map(|f| f.x).collect()
            })
            .collect();

        assert_eq!(framed[0], [100.0, 200.0, 300.0]);
        assert_eq!(framed[0], framed[1]);
        assert_eq!(framed[1], framed[2]);
    }

    #[test]
    fn burst_keeps_only_latest_envelope() {
        let burst = format!("{}{}", telemetry(100.0), telemetry(200.0));
        let script = vec![Some(burst.into_bytes()), None];
        let mut framer =
            StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());

        let xs: Vec<f64> = drain(&mut framer).into_iter().map(|f| f.x).collect();
        assert_eq!(xs, [200.0]);
    }

    #[test]
    fn incomplete_envelope_waits_for_more_bytes() {
        let wire = telemetry(550.0);
        let (head, tail) = wire.split_at(wire.len() / 2);
        let script = vec![
            Some(head.as_bytes().to_vec()),
            None,
            None,
            Some(tail.as_bytes().to_vec()),
            None,
        ];
        let mut framer =
            StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());

        let frames = drain(&mut framer);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.stats().messages, 1);
    }

    #[test]
    fn trailing_whitespace_is_tolerated() {
        let wire = format!("{}\r\n  \n", telemetry(550.0));
        let mut framer = StreamFramer::new(Cursor::new(wire.into_bytes()), codec());
        assert_eq!(drain(&mut framer).len(), 1);
    }

    #[test]
    fn undecodable_envelope_is_dropped_not_fatal() {
        let script = vec![
            Some(b"<Message><Event Name=\"Other\"/></Message>".to_vec()),
            None,
            Some(telemetry(300.0).into_bytes()),
            None,
        ];
        let mut framer =
            StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());

        let frames = drain(&mut framer);
        assert_eq!(frames.len(), 1);
        assert_eq!(framer.stats().undecodable, 1);
        assert_eq!(framer.stats().frames, 1);
    }

    #[test]
    fn off_map_frames_are_filtered() {
        let small = MessageCodec::new(MapGeometry::new(100.0, 100.0, 1.0));
        let off_map = small.encode_telemetry(&TelemetryFrame::ego(-5.0, 50.0, 0.0, 1.0));
        let on_map = small.encode_telemetry(&TelemetryFrame::ego(5.0, 50.0, 0.0, 1.0));
        let script = vec![
            Some(off_map.into_bytes()),
            None,
            Some(on_map.into_bytes()),
            None,
        ];
        let mut framer = StreamFramer::with_config(ScriptedReader::new(script), small, fast_config());

        let frames = drain(&mut framer);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].x, 5.0);
        assert_eq!(framer.stats().out_of_bounds, 1);
    }

    #[test]
    fn closing_tag_without_opening_is_discarded() {
        let script = vec![Some(b"garbage</Message>".to_vec()), None];
        let mut framer =
            StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());
        assert!(drain(&mut framer).is_empty());
        assert_eq!(framer.stats().messages, 0);
    }

    #[test]
    fn empty_stream_reports_connection_ended() {
        let mut framer = StreamFramer::new(Cursor::new(Vec::<u8>::new()), codec());
        let err = framer.next_message(&CancelToken::new()).unwrap_err();
        assert!(matches!(err, FrameError::ConnectionClosed));
    }

    #[test]
    fn reset_is_connection_ended() {
        struct Reset;
        impl Read for Reset {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::ConnectionReset))
            }
        }

        let mut framer = StreamFramer::new(Reset, codec());
        let exit = framer.run(&CancelToken::new(), |_| ControlFlow::Continue(()));
        assert_eq!(exit, LoopExit::ConnectionEnded);
    }

    #[test]
    fn cancel_stops_a_quiet_stream() {
        struct Quiet;
        impl Read for Quiet {
            fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(ErrorKind::WouldBlock))
            }
        }

        let cancel = CancelToken::new();
        let trigger = {
            let cancel = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(30));
                cancel.cancel();
            })
        };

        let mut framer = StreamFramer::new(Quiet, codec());
        let exit = framer.run(&cancel, |_| ControlFlow::Continue(()));
        assert_eq!(exit, LoopExit::Cancelled);
        trigger.join().unwrap();
    }

    #[test]
    fn sink_can_stop_the_loop() {
        let script = vec![
            Some(telemetry(100.0).into_bytes()),
            None,
            Some(telemetry(200.0).into_bytes()),
            None,
        ];
        let mut framer =
            StreamFramer::with_config(ScriptedReader::new(script), codec(), fast_config());
        let exit = framer.run(&CancelToken::new(), |_| ControlFlow::Break(()));
        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(framer.stats().frames, 1);
    }

    #[test]
    fn oversized_buffer_is_discarded() {
        let mut core = FramerCore::new(16);
        assert!(core.push(b"<Message><Event").is_none());
        assert!(core.push(b" Name=").is_none());
        assert_eq!(core.buffered(), 0);
    }

    #[test]
    fn frames_over_loopback_socket() {
        use std::io::Write;
        use simbridge_transport::TcpTransport;

        let listener = TcpTransport::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().to_string();

        let producer = std::thread::spawn(move || {
            let mut sim = listener.accept(&CancelToken::new()).unwrap().unwrap();
            for x in [120.0, 240.0] {
                sim.write_all(telemetry(x).as_bytes()).unwrap();
                std::thread::sleep(Duration::from_millis(60));
            }
        });

        let stream = TcpTransport::connect(&addr, Some(Duration::from_secs(2))).unwrap();
        let mut framer = StreamFramer::for_stream(
            stream,
            codec(),
            FramerConfig {
                poll_interval: Duration::from_millis(10),
                ..FramerConfig::default()
            },
        )
        .unwrap();

        let xs: Vec<f64> = drain(&mut framer).into_iter().map(|f| f.x).collect();
        producer.join().unwrap();
        assert_eq!(xs, [120.0, 240.0]);
    }
}
