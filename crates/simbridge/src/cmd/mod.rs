use clap::{Args, Subcommand};
use std::path::PathBuf;

use simbridge::BridgeContext;
use simbridge_transport::CancelToken;

use crate::exit::{CliError, CliResult, INTERNAL};
use crate::output::OutputFormat;

pub mod bridge;
pub mod evaluate;
pub mod startup;
pub mod telemetry;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the subscription/startup message sent to the simulator.
    Startup(StartupArgs),
    /// Connect to the simulator and print decoded telemetry frames.
    Telemetry(TelemetryArgs),
    /// Run the control bridge, relaying stdin to the peer and peer lines to stdout.
    Bridge(BridgeArgs),
    /// Score a recorded episode file.
    Evaluate(EvaluateArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, ctx: BridgeContext, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Startup(args) => startup::run(args, &ctx, format),
        Command::Telemetry(args) => telemetry::run(args, ctx, format),
        Command::Bridge(args) => bridge::run(args, ctx),
        Command::Evaluate(args) => evaluate::run(args, &ctx, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct StartupArgs {
    /// Pedestrians to subscribe to (overrides config).
    #[arg(long)]
    pub pedestrians: Option<usize>,
    /// Telemetry update interval in milliseconds (overrides config).
    #[arg(long)]
    pub interval: Option<u32>,
}

#[derive(Args, Debug)]
pub struct TelemetryArgs {
    /// Simulator address (overrides config).
    #[arg(long, env = "SIMBRIDGE_SIM_ADDR")]
    pub addr: Option<String>,
    /// Pedestrians to subscribe to (overrides config).
    #[arg(long)]
    pub pedestrians: Option<usize>,
    /// Telemetry update interval in milliseconds (overrides config).
    #[arg(long)]
    pub interval: Option<u32>,
    /// Exit after printing N frames.
    #[arg(long)]
    pub count: Option<u64>,
}

#[derive(Args, Debug)]
pub struct BridgeArgs {
    /// Listen address (overrides config).
    #[arg(long, env = "SIMBRIDGE_BRIDGE_ADDR")]
    pub listen: Option<String>,
    /// Exit after receiving N lines from the peer.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Episode JSON file.
    pub file: PathBuf,
    /// Maximum vehicle speed (overrides config).
    #[arg(long)]
    pub max_speed: Option<f64>,
    /// Label printed with the metrics (overrides the file).
    #[arg(long)]
    pub label: Option<String>,
    /// Score episodes with too few states instead of rejecting them.
    #[arg(long)]
    pub allow_short: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Cancel `token` on Ctrl-C.
pub fn install_ctrlc_handler(token: CancelToken) -> CliResult<()> {
    ctrlc::set_handler(move || token.cancel()).map_err(|err| {
        CliError::new(INTERNAL, format!("signal handler setup failed: {err}"))
    })
}
