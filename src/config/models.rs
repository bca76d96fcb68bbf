//! Configuration data structures for Beacon.
//!
//! These types map directly to YAML / TOML / JSON configuration files and to
//! `BEACON_*` environment variables. Every field has a default so that an
//! empty file (or no file at all) yields a runnable server.
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Operating mode. Selects the default log format and is reported by the
/// diagnostics endpoints.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Development,
    #[default]
    Production,
    Test,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Development => write!(f, "development"),
            Mode::Production => write!(f, "production"),
            Mode::Test => write!(f, "test"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" | "release" => Ok(Mode::Production),
            "test" => Ok(Mode::Test),
            other => Err(format!("unknown mode '{other}'")),
        }
    }
}

/// Log output format.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `"info"` or `"beacon=debug,hyper=warn"`.
    pub level: String,
    /// Output format. Falls back to a mode-dependent default when unset.
    pub format: Option<LogFormat>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: None,
        }
    }
}

impl LoggingConfig {
    /// Format to use when none is configured explicitly.
    pub fn effective_format(&self, mode: Mode) -> LogFormat {
        self.format.unwrap_or(match mode {
            Mode::Production => LogFormat::Json,
            Mode::Development | Mode::Test => LogFormat::Pretty,
        })
    }
}

/// Per-client fixed-window rate limit settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Requests admitted per client per window.
    pub requests: u32,
    /// Window length, parsed by humantime (e.g. "1m", "30s").
    pub period: String,
    /// How often expired client buckets are swept.
    pub cleanup_interval: String,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            requests: 100,
            period: "1m".to_string(),
            cleanup_interval: "5m".to_string(),
        }
    }
}

impl RateLimitSettings {
    /// Parsed window length. Validation guarantees this parses for a
    /// validated config; the default minute is used otherwise.
    pub fn window(&self) -> Duration {
        humantime::parse_duration(&self.period).unwrap_or(Duration::from_secs(60))
    }

    /// Parsed sweep interval.
    pub fn cleanup_every(&self) -> Duration {
        humantime::parse_duration(&self.cleanup_interval).unwrap_or(Duration::from_secs(300))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    /// Registers the `/debug/*` routes.
    pub enable_diagnostics: bool,
    pub enable_cors: bool,
    pub enable_rate_limit: bool,
    pub rate_limit: RateLimitSettings,
    pub logging: LoggingConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9100,
            mode: Mode::default(),
            read_timeout_secs: 10,
            write_timeout_secs: 10,
            idle_timeout_secs: 60,
            shutdown_timeout_secs: 30,
            enable_diagnostics: false,
            enable_cors: false,
            enable_rate_limit: false,
            rate_limit: RateLimitSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn mode(mut self, mode: Mode) -> Self {
        self.config.mode = mode;
        self
    }

    /// Set read, write and idle timeouts in one call.
    pub fn timeouts(mut self, read_secs: u64, write_secs: u64, idle_secs: u64) -> Self {
        self.config.read_timeout_secs = read_secs;
        self.config.write_timeout_secs = write_secs;
        self.config.idle_timeout_secs = idle_secs;
        self
    }

    pub fn shutdown_timeout_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_timeout_secs = secs;
        self
    }

    pub fn diagnostics(mut self, enabled: bool) -> Self {
        self.config.enable_diagnostics = enabled;
        self
    }

    pub fn cors(mut self, enabled: bool) -> Self {
        self.config.enable_cors = enabled;
        self
    }

    pub fn rate_limit(mut self, enabled: bool) -> Self {
        self.config.enable_rate_limit = enabled;
        self
    }

    /// Configure the limiter quota, e.g. `rate_limit_quota(5, "1s")`.
    pub fn rate_limit_quota(mut self, requests: u32, period: impl Into<String>) -> Self {
        self.config.rate_limit.requests = requests;
        self.config.rate_limit.period = period.into();
        self
    }

    pub fn logging(mut self, logging: LoggingConfig) -> Self {
        self.config.logging = logging;
        self
    }

    /// Build the final ServerConfig. Semantic checks are left to
    /// [`ServerConfigValidator`](crate::config::ServerConfigValidator).
    pub fn build(self) -> ServerConfig {
        self.config
    }
}
