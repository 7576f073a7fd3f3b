//! Tracing subscriber installation
//!
//! `RUST_LOG` wins over [`LoggingConfig::filter`] when set. Output is either
//! human-readable (`pretty`) or one JSON object per line (`json`).

use streamwarden_domain::{LogFormat, LoggingConfig, Result, WardenError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, falling back to the configured directive
///
/// # Errors
/// Returns `WardenError::Config` if the configured directive does not parse.
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| {
        WardenError::Config(format!("Invalid log filter '{}': {e}", config.filter))
    })
}

/// Install the global subscriber
///
/// Returns `Ok(false)` when a subscriber is already installed, which is the
/// normal case inside test binaries.
///
/// # Errors
/// Returns `WardenError::Config` if the filter directive does not parse.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool> {
    let filter = build_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => {
            registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
        }
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init(),
    };

    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_is_config_error() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config =
            LoggingConfig { filter: "streamwarden=verbose".to_string(), ..Default::default() };
        let err = build_filter(&config).expect_err("bad directive");
        assert!(matches!(err, WardenError::Config(_)));
    }

    #[test]
    fn test_second_install_reports_existing_subscriber() {
        let config = LoggingConfig { format: LogFormat::Json, ..Default::default() };
        let _first = init_tracing(&config).expect("valid filter");
        assert!(!init_tracing(&config).expect("valid filter"));
    }
}
