use crate::cli::{actions::Action, commands, dispatch::handler, telemetry};
use anyhow::Result;
use tracing::Level;

/// Parse the command line, set up logging and return the action to run.
///
/// # Errors
/// Returns an error if telemetry cannot be initialized or the arguments are
/// inconsistent.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let verbosity_level = log_level(matches.get_one::<u8>("verbosity").map_or(0, |&v| v));

    telemetry::init(Some(verbosity_level))?;

    handler(&matches)
}

fn log_level(verbosity: u8) -> Level {
    match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    }
}
