//! Async telemetry reader built on `tokio_util::codec::FramedRead`.
//!
//! Run against `fake-simulator`:
//!   cargo run --example fake-simulator
//!   cargo run --example async-telemetry --features async

use futures_util::{SinkExt, StreamExt};
use simbridge::frame::{encode_startup, EnvelopeCodec, MessageCodec};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string());
    let stream = TcpStream::connect(&addr).await?;
    let mut framed = Framed::new(stream, EnvelopeCodec::new());

    framed.send(encode_startup(100, 2)).await?;

    let codec = MessageCodec::default();
    let mut received = 0usize;
    while let Some(message) = framed.next().await {
        let message = message?;
        match codec.decode_telemetry(&message) {
            Ok(frame) if codec.in_bounds(&frame) => {
                received += 1;
                println!(
                    "#{received} x={:.1} z={:.1} speed={:.1} peds={}",
                    frame.x,
                    frame.z,
                    frame.speed,
                    frame.pedestrian_count()
                );
                if received == 10 {
                    break;
                }
            }
            Ok(_) => {}
            Err(err) => eprintln!("skipping envelope: {err}"),
        }
    }

    Ok(())
}
