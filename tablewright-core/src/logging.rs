//! Logging setup for the tablewright binary and embedding applications.

use crate::{Result, error::TablewrightError};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Maps CLI verbosity flags to a maximum level.
///
/// `quiet` wins over any verbosity: 0=INFO, 1=DEBUG, 2+=TRACE.
pub fn level_for(verbose: u8, quiet: bool) -> Level {
    match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    }
}

/// Initializes structured logging based on verbosity level.
///
/// A `RUST_LOG` directive in the environment takes precedence over the
/// verbosity flags.
///
/// # Errors
/// Returns a configuration error if a global subscriber is already set.
///
/// # Example
/// ```rust,no_run
/// use tablewright_core::logging::init_logging;
///
/// // Initialize at DEBUG level
/// init_logging(1, false).expect("Failed to initialize logging");
/// ```
pub fn init_logging(verbose: u8, quiet: bool) -> Result<()> {
    let level = level_for(verbose, quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_ascii_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| {
            TablewrightError::configuration(format!("Failed to initialize logging: {e}"))
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A global subscriber can only be installed once per process, so only
    // the level mapping is tested here.

    #[test]
    fn test_verbosity_levels() {
        let test_cases = [
            ((true, 0), Level::ERROR),
            ((true, 5), Level::ERROR),
            ((false, 0), Level::INFO),
            ((false, 1), Level::DEBUG),
            ((false, 2), Level::TRACE),
            ((false, 10), Level::TRACE),
        ];

        for ((quiet, verbose), expected) in test_cases {
            assert_eq!(
                level_for(verbose, quiet),
                expected,
                "Failed for quiet={quiet}, verbose={verbose}"
            );
        }
    }
}
