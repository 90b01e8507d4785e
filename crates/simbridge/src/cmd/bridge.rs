use std::io::{self, BufRead};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use simbridge::BridgeContext;
use simbridge_peer::{ControlBridge, PeerError};
use simbridge_transport::CancelToken;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, BridgeArgs};
use crate::exit::{io_error, peer_error, CliResult, SUCCESS};
use crate::output::print_line;

/// How often the receive loop checks for Ctrl-C.
const RECEIVE_POLL: Duration = Duration::from_millis(200);

pub fn run(args: BridgeArgs, mut ctx: BridgeContext) -> CliResult<i32> {
    if let Some(listen) = args.listen {
        ctx.bridge_addr = listen;
    }

    let bridge = Arc::new(
        ctx.bind_bridge()
            .map_err(|err| peer_error("bind failed", err))?,
    );
    info!(addr = %bridge.local_addr(), "control bridge listening");

    let cancel = CancelToken::new();
    install_ctrlc_handler(cancel.clone())?;

    {
        let bridge = Arc::clone(&bridge);
        thread::Builder::new()
            .name("simbridge-stdin".into())
            .spawn(move || relay_stdin(&bridge))
            .map_err(|err| io_error("failed to start stdin relay", err))?;
    }

    let mut received = 0usize;
    let result = loop {
        if cancel.is_cancelled() {
            break Ok(SUCCESS);
        }
        match bridge.receive_timeout(RECEIVE_POLL) {
            Ok(line) => {
                print_line(&line);
                received += 1;
                if args.count.is_some_and(|limit| received >= limit) {
                    break Ok(SUCCESS);
                }
            }
            Err(PeerError::Timeout(_)) => continue,
            Err(PeerError::Shutdown) => break Ok(SUCCESS),
            Err(err) => break Err(peer_error("receive failed", err)),
        }
    };

    bridge
        .shutdown()
        .map_err(|err| peer_error("shutdown failed", err))?;
    result
}

/// Forward stdin lines to the attached peer until stdin closes or the bridge
/// shuts down.
fn relay_stdin(bridge: &ControlBridge) {
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!(error = %err, "stdin read failed");
                return;
            }
        };
        if let Err(err) = bridge.send(line) {
            debug!(error = %err, "stdin relay stopped");
            return;
        }
    }
    debug!("stdin closed");
}
