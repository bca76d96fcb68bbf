use eyre::{Result, WrapErr};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::models::{LogFormat, LoggingConfig, Mode};

/// Initialize logging from configuration.
///
/// `RUST_LOG` takes precedence over `logging.level`. The output format is
/// `logging.format` when set, otherwise JSON in production and pretty
/// output in development and test.
pub fn init_tracing(logging: &LoggingConfig, mode: Mode) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .wrap_err_with(|| format!("Invalid log level: {}", logging.level))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let format = logging.effective_format(mode);
    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(env_filter)
            .with(fmt_layer.json().with_current_span(true).with_span_list(false))
            .try_init(),
        LogFormat::Pretty => Registry::default()
            .with(env_filter)
            .with(fmt_layer.pretty().with_ansi(true))
            .try_init(),
    };
    installed.wrap_err("A global tracing subscriber is already installed")?;

    tracing::debug!(level = %logging.level, ?format, %mode, "logging initialized");
    Ok(())
}

/// Create the span wrapping a single request.
pub fn request_span(method: &str, path: &str, request_id: Option<&str>) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id.unwrap_or(""),
        http.status_code = tracing::field::Empty,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_span() {
        let span = request_span("GET", "/metrics", Some("req-123"));
        if let Some(meta) = span.metadata() {
            assert_eq!(meta.name(), "request");
        }
    }

    #[test]
    fn test_init_rejects_bad_level_without_env_override() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let logging = LoggingConfig {
            level: "beacon=notalevel".to_string(),
            format: Some(LogFormat::Json),
        };
        assert!(init_tracing(&logging, Mode::Test).is_err());
    }
}
