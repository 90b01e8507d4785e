use std::ops::ControlFlow;

use simbridge::BridgeContext;
use simbridge_transport::CancelToken;
use tracing::info;

use crate::cmd::{install_ctrlc_handler, TelemetryArgs};
use crate::exit::{CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat};

pub fn run(args: TelemetryArgs, mut ctx: BridgeContext, format: OutputFormat) -> CliResult<i32> {
    if let Some(addr) = args.addr {
        ctx.link.addr = addr;
    }
    if let Some(pedestrians) = args.pedestrians {
        ctx.link.pedestrian_count = pedestrians;
    }
    if let Some(interval) = args.interval {
        ctx.link.update_interval_ms = interval;
    }

    let cancel = CancelToken::new();
    install_ctrlc_handler(cancel.clone())?;

    let link = ctx.telemetry_link();
    info!(addr = %ctx.link.addr, "streaming telemetry");

    let mut printed = 0u64;
    let exit = link.run(&cancel, |frame| {
        printed += 1;
        let in_front = ctx.evaluator.pedestrians_in_front(&frame);
        print_frame(printed, &frame, &in_front, &ctx.codec, format);

        match args.count {
            Some(limit) if printed >= limit => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        }
    });

    let stats = link.stats();
    info!(
        ?exit,
        frames = stats.frames,
        undecodable = stats.undecodable,
        out_of_bounds = stats.out_of_bounds,
        "telemetry stopped"
    );

    Ok(SUCCESS)
}
