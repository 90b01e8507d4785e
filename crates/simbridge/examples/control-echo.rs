//! Control bridge demo: serves one agent at a time and answers every line
//! with an acknowledgement.
//!
//! Run with:
//!   cargo run --example control-echo
//!
//! Then connect an agent, e.g.:
//!   nc 127.0.0.1:4100

use std::time::Duration;

use simbridge::peer::{PeerError, Result};
use simbridge::BridgeContext;

fn main() -> Result<()> {
    let ctx = BridgeContext::default();
    let bridge = ctx.bind_bridge()?;
    eprintln!("Control bridge listening on {}", bridge.local_addr());

    bridge.wait_connected(Duration::from_secs(60))?;
    eprintln!("Agent attached from {:?}", bridge.peer_addr());

    loop {
        let line = match bridge.receive_timeout(Duration::from_secs(30)) {
            Ok(line) => line,
            Err(PeerError::Timeout(_)) => {
                eprintln!("No traffic for 30s, stopping");
                break;
            }
            Err(err) => return Err(err),
        };
        eprintln!("<- {line}");
        if line == "quit" {
            break;
        }
        bridge.send(format!("ack {line}"))?;
    }

    bridge.shutdown()
}
