use simbridge::BridgeContext;
use simbridge_frame::{encode_startup, parse_envelope};

use crate::cmd::StartupArgs;
use crate::exit::{frame_error, CliResult, SUCCESS};
use crate::output::{print_events, OutputFormat};

pub fn run(args: StartupArgs, ctx: &BridgeContext, format: OutputFormat) -> CliResult<i32> {
    let pedestrians = args.pedestrians.unwrap_or(ctx.link.pedestrian_count);
    let interval = args.interval.unwrap_or(ctx.link.update_interval_ms);

    let envelope = encode_startup(interval, pedestrians);
    let events =
        parse_envelope(&envelope).map_err(|err| frame_error("startup message", err.into()))?;
    print_events(&envelope, &events, format);

    Ok(SUCCESS)
}
