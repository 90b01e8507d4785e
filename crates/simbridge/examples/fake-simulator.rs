//! Stand-in simulator: accepts one telemetry client, streams a car driving
//! toward a pedestrian, and prints every control envelope it receives.
//!
//! Run with:
//!   cargo run --example fake-simulator
//!
//! In another terminal:
//!   cargo run --features cli -- telemetry --addr 127.0.0.1:4000 --count 20

use std::thread;
use std::time::Duration;

use simbridge::frame::{
    parse_envelope, FrameError, FramerConfig, MessageCodec, MessageWriter, StreamFramer,
    TelemetryFrame,
};
use simbridge::transport::{CancelToken, TcpTransport};

const TICK: Duration = Duration::from_millis(100);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:4000".to_string());
    let listener = TcpTransport::bind(&addr)?;
    eprintln!("Simulator listening on {}", listener.local_addr());

    let cancel = CancelToken::new();
    let Some(stream) = listener.accept(&cancel)? else {
        return Ok(());
    };
    eprintln!("Client connected: {:?}", stream.peer_addr());

    let codec = MessageCodec::default();
    let mut framer = StreamFramer::for_stream(stream.try_clone()?, codec, FramerConfig::default())?;

    let startup = framer.next_message(&cancel)?;
    let events = parse_envelope(&startup)?;
    eprintln!("Startup carried {} events", events.len());

    let mut writer = MessageWriter::for_stream(stream, Some(Duration::from_secs(1)))?;
    let ticker = {
        let cancel = cancel.clone();
        thread::spawn(move || {
            let mut x = 100.0;
            while !cancel.is_cancelled() {
                let frame = TelemetryFrame::ego(x, 400.0, 0.0, 8.0)
                    .with_pedestrian(160.0, 400.5, 1.2)
                    .with_pedestrian(220.0, 380.0, 0.0);
                if let Err(err) = writer.send(&codec.encode_telemetry(&frame)) {
                    eprintln!("Client went away: {err}");
                    cancel.cancel();
                    return;
                }
                x += 1.0;
                if cancel.wait_timeout(TICK) {
                    return;
                }
            }
        })
    };

    loop {
        match framer.next_message(&cancel) {
            Ok(message) => {
                for event in parse_envelope(&message)? {
                    println!("{} {}", event.name, event.payload);
                }
            }
            Err(FrameError::ConnectionClosed | FrameError::Cancelled) => break,
            Err(err) => {
                eprintln!("Read failed: {err}");
                break;
            }
        }
    }

    cancel.cancel();
    let _ = ticker.join();
    Ok(())
}
