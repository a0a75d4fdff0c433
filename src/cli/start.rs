use crate::cli::{actions::Action, commands, dispatch, telemetry};
use anyhow::Result;
use tracing::{Level, debug};

/// Without `-v` only errors reach stderr.
const fn verbosity_level(count: u8) -> Option<Level> {
    match count {
        0 => None,
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        _ => Some(Level::TRACE),
    }
}

/// Parse the command line, set up logging and resolve the [`Action`] to run.
///
/// # Errors
///
/// Returns an error if telemetry can't be initialized or the arguments don't
/// describe a runnable action.
pub fn start() -> Result<Action> {
    let matches = commands::new().get_matches();

    let count = matches
        .get_one::<u8>(commands::logging::ARG_VERBOSITY)
        .copied()
        .unwrap_or_default();
    telemetry::init(verbosity_level(count))?;
    debug!(
        version = env!("CARGO_PKG_VERSION"),
        commit = crate::GIT_COMMIT_HASH,
        "campus-auth starting"
    );

    dispatch::handler(&matches)
}
