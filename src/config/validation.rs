#![allow(clippy::collapsible_if)]

use std::{net::IpAddr, time::Duration};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing_subscriber::EnvFilter;

use crate::config::models::{LoggingConfig, RateLimitSettings, ServerConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

static HOSTNAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?(\.[a-zA-Z0-9]([a-zA-Z0-9\-]{0,61}[a-zA-Z0-9])?)*$")
        .expect("invalid hostname regex")
});

/// Longest accepted network or shutdown timeout (one year).
pub const MAX_TIMEOUT_SECS: u64 = 365 * 24 * 60 * 60;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Server configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire server configuration, collecting every problem
    /// instead of stopping at the first.
    pub fn validate(config: &ServerConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_host(&config.host) {
            errors.push(e);
        }

        if config.port == 0 {
            errors.push(ValidationError::InvalidListenAddress {
                address: config.listen_addr(),
                reason: "port must be between 1 and 65535".to_string(),
            });
        }

        for (field, secs) in [
            ("read_timeout_secs", config.read_timeout_secs),
            ("write_timeout_secs", config.write_timeout_secs),
            ("idle_timeout_secs", config.idle_timeout_secs),
            ("shutdown_timeout_secs", config.shutdown_timeout_secs),
        ] {
            if secs == 0 {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "timeout must be greater than 0".to_string(),
                });
            } else if secs > MAX_TIMEOUT_SECS {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: format!("timeout must be at most {MAX_TIMEOUT_SECS} seconds"),
                });
            }
        }

        if let Err(mut rate_limit_errors) = Self::validate_rate_limit(&config.rate_limit) {
            errors.append(&mut rate_limit_errors);
        }

        if let Err(e) = Self::validate_logging(&config.logging) {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate host field format: an IP literal or an RFC-1123 hostname.
    fn validate_host(host: &str) -> ValidationResult<()> {
        if host.is_empty() {
            return Err(ValidationError::MissingField {
                field: "host".to_string(),
            });
        }

        if host.contains("://") {
            return Err(ValidationError::InvalidField {
                field: "host".to_string(),
                message: "Host should not contain protocol (e.g., use 'localhost' not 'http://localhost')".to_string(),
            });
        }

        let unbracketed = host.trim_start_matches('[').trim_end_matches(']');
        if unbracketed.parse::<IpAddr>().is_ok() || HOSTNAME.is_match(host) {
            return Ok(());
        }

        Err(ValidationError::InvalidField {
            field: "host".to_string(),
            message: format!("Invalid hostname format: '{host}'"),
        })
    }

    fn validate_rate_limit(settings: &RateLimitSettings) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if settings.requests == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.requests".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        for (field, value) in [
            ("rate_limit.period", &settings.period),
            ("rate_limit.cleanup_interval", &settings.cleanup_interval),
        ] {
            match humantime::parse_duration(value) {
                Ok(d) if d > Duration::ZERO => {}
                Ok(_) => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "must be greater than 0".to_string(),
                }),
                Err(e) => errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: format!("invalid duration '{value}': {e}"),
                }),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_logging(logging: &LoggingConfig) -> ValidationResult<()> {
        EnvFilter::try_new(&logging.level)
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            })
    }

    /// Format multiple validation errors into a single message
    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.is_empty() {
            return "No errors".to_string();
        }

        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("Found {} validation errors:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
