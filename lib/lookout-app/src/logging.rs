//! Logging.

use lookout_error::{generic_error, GenericError};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter};

/// Environment variable controlling the log level filter.
const LOG_LEVEL_ENV: &str = "LOOKOUT_LOG_LEVEL";

/// Initializes the logging subsystem for `tracing`.
///
/// The filter is read from `LOOKOUT_LOG_LEVEL`, falling back to `info` when the variable is not
/// set. Output goes to standard error so it never interleaves with a test framework's own
/// reporter on standard output.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error is returned.
pub fn initialize_logging() -> Result<(), GenericError> {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .map_err(|e| generic_error!("failed to initialize logging: {}", e))
}
