mod cmd;
mod exit;
mod logging;
mod output;

use std::path::PathBuf;

use clap::Parser;
use simbridge::{BridgeContext, SimConfig};

use crate::cmd::Command;
use crate::exit::{config_error, CliResult};
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "simbridge", version, about = "Driving simulator bridge CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    /// JSON configuration file.
    #[arg(long, value_name = "FILE", env = "SIMBRIDGE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

fn load_context(path: Option<&PathBuf>) -> CliResult<BridgeContext> {
    let config = match path {
        Some(path) => SimConfig::load(path).map_err(config_error)?,
        None => SimConfig::default(),
    };
    Ok(BridgeContext::from_config(&config))
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result =
        load_context(cli.config.as_ref()).and_then(|ctx| cmd::run(cli.command, ctx, format));

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}
