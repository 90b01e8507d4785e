use std::io::{ErrorKind, Write};

use simbridge_transport::BridgeStream;

use crate::codec::{encode_command, encode_startup, encode_vehicle_control};
use crate::command::{Command, ControlCommand, VehicleControl};
use crate::error::{FrameError, Result};
use crate::framer::transport_to_frame_error;

/// Writes complete envelopes to any `Write` stream, one envelope per send.
pub struct MessageWriter<T> {
    inner: T,
}

impl<T: Write> MessageWriter<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }

    /// Write one pre-encoded envelope and flush (blocking).
    pub fn send(&mut self, message: &str) -> Result<()> {
        let bytes = message.as_bytes();
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.inner.write(&bytes[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Send the subscription/startup sequence.
    pub fn send_startup(&mut self, update_interval_ms: u32, pedestrian_count: usize) -> Result<()> {
        self.send(&encode_startup(update_interval_ms, pedestrian_count))
    }

    /// Send one drive command.
    pub fn send_control(&mut self, control: &ControlCommand) -> Result<()> {
        self.send(&encode_vehicle_control(&VehicleControl::Drive(
            control.clone(),
        )))
    }

    /// Send one scene-control token.
    pub fn send_command(&mut self, command: Command) -> Result<()> {
        self.send(&encode_command(command))
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl MessageWriter<BridgeStream> {
    /// Create a writer for a socket with a write deadline.
    pub fn for_stream(
        inner: BridgeStream,
        write_timeout: Option<std::time::Duration>,
    ) -> Result<Self> {
        inner
            .set_write_timeout(write_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::new(inner))
    }
}
