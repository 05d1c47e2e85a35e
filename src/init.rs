use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Error returned when the diagnostics subscriber cannot be installed.
#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("invalid log filter '{directive}': {message}")]
    Filter { directive: String, message: String },

    #[error("failed to install global subscriber: {0}")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// Build the `EnvFilter` for a directive, falling back to `info` when the
/// directive does not parse.
pub fn build_filter(directive: &str) -> Result<EnvFilter, InitError> {
    EnvFilter::try_new(directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| InitError::Filter {
            directive: directive.to_string(),
            message: e.to_string(),
        })
}

/// Install the global `tracing` subscriber for the gateway's own logs.
///
/// **Parameters**
/// - `config`: [`LoggingConfig`] with the filter directive and output
///   format (`pretty` for humans, `json` for log pipelines).
///
/// **Effects**
///
/// Installs a [`Registry`] with an [`EnvFilter`] and one `fmt` layer as the
/// global default subscriber. Fails if a global subscriber already exists.
pub fn init_logging(config: &LoggingConfig) -> Result<(), InitError> {
    let filter = build_filter(&config.level)?;

    match config.format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .try_init()?,
        LogFormat::Pretty => Registry::default()
            .with(filter)
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .try_init()?,
    }

    Ok(())
}
