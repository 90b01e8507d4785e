//! Supervised telemetry connection to the simulator.
//!
//! [`TelemetryLink::run`] connects, sends the startup subscription, feeds
//! decoded frames to a sink, and reconnects whenever the connection ends,
//! until cancelled or the sink stops. Control messages go out through a
//! [`LinkController`], which any thread may hold.

use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use simbridge_frame::{
    Command, ControlCommand, FramerConfig, FramerStats, LoopExit, MessageCodec, MessageWriter,
    StreamFramer, TelemetryFrame,
};
use simbridge_transport::{BridgeStream, CancelToken, TcpTransport};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};

/// Connection settings for [`TelemetryLink`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Simulator address, `host:port`.
    pub addr: String,
    /// Vehicle id used in drive commands.
    pub vehicle_id: String,
    /// Pedestrians to subscribe to.
    pub pedestrian_count: usize,
    /// Requested telemetry period.
    pub update_interval_ms: u32,
    /// Pause between reconnect attempts.
    pub reconnect_delay: Duration,
    pub connect_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4000".to_string(),
            vehicle_id: "ego".to_string(),
            pedestrian_count: 0,
            update_interval_ms: 100,
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
        }
    }
}

type SharedWriter = Arc<Mutex<Option<MessageWriter<BridgeStream>>>>;

/// Sends control messages over the link's current connection.
#[derive(Clone)]
pub struct LinkController {
    writer: SharedWriter,
    vehicle_id: String,
}

impl LinkController {
    /// True while a simulator connection is up.
    pub fn is_connected(&self) -> bool {
        self.lock().is_some()
    }

    /// Drive the configured vehicle.
    pub fn drive(
        &self,
        steering: f64,
        throttle: f64,
        brake: f64,
        target_speed: Option<f64>,
    ) -> Result<()> {
        let mut control = ControlCommand::new(self.vehicle_id.as_str(), steering, throttle, brake);
        control.target_speed = target_speed;
        self.send_control(&control)
    }

    pub fn send_control(&self, control: &ControlCommand) -> Result<()> {
        self.with_writer(|writer| writer.send_control(control))
    }

    pub fn send_command(&self, command: Command) -> Result<()> {
        self.with_writer(|writer| writer.send_command(command))
    }

    fn with_writer<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut MessageWriter<BridgeStream>) -> simbridge_frame::Result<()>,
    {
        let mut guard = self.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| PeerError::Disconnected("no simulator connection".to_string()))?;
        f(writer).map_err(PeerError::from)
    }

    fn lock(&self) -> MutexGuard<'_, Option<MessageWriter<BridgeStream>>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes a session's writer to the controllers; dropping it empties the
/// slot and shuts the socket down on every exit path.
struct InstalledWriter<'a> {
    slot: &'a SharedWriter,
}

impl<'a> InstalledWriter<'a> {
    fn install(slot: &'a SharedWriter, writer: MessageWriter<BridgeStream>) -> Self {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(writer);
        Self { slot }
    }
}

impl Drop for InstalledWriter<'_> {
    fn drop(&mut self) {
        let writer = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(writer) = writer {
            if let Err(err) = writer.get_ref().shutdown() {
                debug!(error = %err, "simulator socket shutdown failed");
            }
        }
    }
}

/// Reconnecting telemetry client.
pub struct TelemetryLink {
    config: LinkConfig,
    codec: MessageCodec,
    framer: FramerConfig,
    writer: SharedWriter,
    stats: Mutex<FramerStats>,
}

impl TelemetryLink {
    pub fn new(config: LinkConfig, codec: MessageCodec, framer: FramerConfig) -> Self {
        Self {
            config,
            codec,
            framer,
            writer: Arc::new(Mutex::new(None)),
            stats: Mutex::new(FramerStats::default()),
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Handle for sending control messages from any thread.
    pub fn controller(&self) -> LinkController {
        LinkController {
            writer: Arc::clone(&self.writer),
            vehicle_id: self.config.vehicle_id.clone(),
        }
    }

    /// Framer counters summed over every connection so far.
    pub fn stats(&self) -> FramerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run until `cancel` fires ([`LoopExit::Cancelled`]) or `sink` breaks
    /// ([`LoopExit::Stopped`]). Lost connections are re-established.
    pub fn run<F>(&self, cancel: &CancelToken, mut sink: F) -> LoopExit
    where
        F: FnMut(TelemetryFrame) -> ControlFlow<()>,
    {
        let mut attempt = 0u64;
        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            attempt += 1;

            match self.session(cancel, &mut sink) {
                Ok(LoopExit::ConnectionEnded) => {
                    info!(addr = %self.config.addr, "simulator connection ended; reconnecting");
                }
                Ok(exit) => return exit,
                Err(err) => {
                    warn!(addr = %self.config.addr, attempt, error = %err, "simulator session failed");
                }
            }

            if cancel.wait_timeout(self.config.reconnect_delay) {
                return LoopExit::Cancelled;
            }
        }
    }

    fn session<F>(&self, cancel: &CancelToken, sink: &mut F) -> Result<LoopExit>
    where
        F: FnMut(TelemetryFrame) -> ControlFlow<()>,
    {
        let stream = TcpTransport::connect(&self.config.addr, self.config.connect_timeout)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr();
        let reader = stream.try_clone()?;

        let mut framer = StreamFramer::for_stream(reader, self.codec, self.framer.clone())?;
        let mut writer = MessageWriter::for_stream(stream, self.config.write_timeout)?;
        writer.send_startup(self.config.update_interval_ms, self.config.pedestrian_count)?;
        debug!(?peer, pedestrians = self.config.pedestrian_count, "sent startup message");

        let _installed = InstalledWriter::install(&self.writer, writer);
        let exit = framer.run(cancel, |frame| sink(frame));
        self.merge_stats(framer.stats());
        Ok(exit)
    }

    fn merge_stats(&self, session: FramerStats) {
        let mut total = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        total.messages += session.messages;
        total.frames += session.frames;
        total.undecodable += session.undecodable;
        total.out_of_bounds += session.out_of_bounds;
    }
}
