//! Tracing subscriber setup shared by binaries and tests.

use thiserror::Error;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),
    #[error(transparent)]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Reads `LOG_FORMAT`; anything other than `json` means text.
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        }
    }
}

/// Filter that keeps third-party crates at `warn` and the workspace crates at `level`.
pub fn filter_string(level: &str) -> String {
    format!(
        "warn,registry_db={level},registry_services={level},registry_utils={level}",
        level = level
    )
}

/// Installs the global subscriber. The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(format: LogFormat) -> Result<(), LoggingError> {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(filter_string(&log_level))?;

    let fmt_layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_filter(filter).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(fmt_layer).try_init()?;
    Ok(())
}

/// Best-effort subscriber for tests; output goes through the test harness writer.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter_string("debug")))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string_scopes_workspace_crates() {
        let filter = filter_string("debug");
        assert!(filter.starts_with("warn,"));
        assert!(filter.contains("registry_services=debug"));
        assert!(filter.contains("registry_db=debug"));
        assert!(EnvFilter::try_new(&filter).is_ok());
    }

    #[test]
    fn test_log_format_default_is_text() {
        assert_eq!(LogFormat::default(), LogFormat::Text);
    }
}
