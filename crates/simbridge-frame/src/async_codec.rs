//! `tokio_util` codec for the XML envelope.
//!
//! Async readers deliver whatever the socket had ready, so every completed
//! read is treated as a quiet point: the decoder extracts an envelope as soon
//! as the buffer ends with `</Message>`.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::{CLOSE_TAG, OPEN_TAG};
use crate::error::FrameError;
use crate::framer::DEFAULT_MAX_BUFFER;

/// Envelope codec for `FramedRead` / `FramedWrite`.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_buffer: usize,
}

impl EnvelopeCodec {
    pub fn new() -> Self {
        Self {
            max_buffer: DEFAULT_MAX_BUFFER,
        }
    }

    pub fn with_max_buffer(max_buffer: usize) -> Self {
        Self { max_buffer }
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(last) = src.iter().rposition(|b| !b.is_ascii_whitespace()) else {
            return Ok(None);
        };
        let body = &src[..=last];

        if !body.ends_with(CLOSE_TAG.as_bytes()) {
            if src.len() > self.max_buffer {
                tracing::warn!(
                    buffered = src.len(),
                    "discarding oversized buffer without a complete envelope"
                );
                src.clear();
            }
            return Ok(None);
        }

        let start = body
            .windows(OPEN_TAG.len())
            .rposition(|w| w == OPEN_TAG.as_bytes());
        let message = start.map(|start| String::from_utf8_lossy(&body[start..]).into_owned());
        let consumed = src.len();
        src.advance(consumed);

        match message {
            Some(message) => Ok(Some(message)),
            None => {
                tracing::warn!("closing tag without opening tag; discarding buffer");
                Ok(None)
            }
        }
    }
}

impl Encoder<String> for EnvelopeCodec {
    type Error = FrameError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::{encode_command, MessageCodec};
    use crate::command::Command;
    use crate::telemetry::TelemetryFrame;

    #[tokio::test]
    async fn reads_one_envelope_per_read() {
        let codec = MessageCodec::default();
        let wire = codec.encode_telemetry(&TelemetryFrame::ego(300.0, 200.0, 0.0, 4.0));

        let mut framed = FramedRead::new(wire.as_bytes(), EnvelopeCodec::new());
        let message = framed.next().await.unwrap().unwrap();
        let frame = codec.decode_telemetry(&message).unwrap();

        assert_eq!(frame.x, 300.0);
        assert!(framed.next().await.is_none());
    }

    #[tokio::test]
    async fn split_envelope_waits_for_the_rest() {
        let mut codec = EnvelopeCodec::new();
        let wire = encode_command(Command::Pause);
        let (head, tail) = wire.split_at(10);

        let mut buf = BytesMut::from(head.as_bytes());
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(tail.as_bytes());
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), wire);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn writes_envelopes_verbatim() {
        let mut out = Vec::new();
        {
            let mut framed = FramedWrite::new(&mut out, EnvelopeCodec::new());
            framed.send(encode_command(Command::Unpause)).await.unwrap();
        }
        assert_eq!(String::from_utf8(out).unwrap(), encode_command(Command::Unpause));
    }

    #[test]
    fn oversized_partial_buffer_is_dropped() {
        let mut codec = EnvelopeCodec::with_max_buffer(8);
        let mut buf = BytesMut::from(&b"<Message><Event"[..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }
}
