use simbridge::BridgeContext;
use simbridge_eval::{EpisodeLog, SafetyEvaluator, MIN_EPISODE_STATES};

use crate::cmd::EvaluateArgs;
use crate::exit::{eval_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_metrics, OutputFormat};

pub fn run(args: EvaluateArgs, ctx: &BridgeContext, format: OutputFormat) -> CliResult<i32> {
    let mut log = EpisodeLog::load(&args.file)
        .map_err(|err| eval_error(&format!("failed reading {}", args.file.display()), err))?;
    if let Some(label) = args.label {
        log.label = Some(label);
    }

    if !log.has_enough_data() && !args.allow_short {
        return Err(CliError::new(
            DATA_INVALID,
            format!(
                "episode has {} states; more than {MIN_EPISODE_STATES} required (pass --allow-short to score anyway)",
                log.len()
            ),
        ));
    }

    let mut config = *ctx.evaluator.config();
    if let Some(max_speed) = args.max_speed {
        config.max_speed = max_speed;
    }

    let metrics = SafetyEvaluator::new(config)
        .evaluate(&log)
        .map_err(|err| eval_error("evaluate failed", err))?;
    print_metrics(&metrics, format);

    Ok(SUCCESS)
}
