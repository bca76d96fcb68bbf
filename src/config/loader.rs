use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::{Mode, ServerConfig};

/// Environment variable prefix, e.g. `BEACON_PORT` or `BEACON_RATE_LIMIT__REQUESTS`.
pub const ENV_PREFIX: &str = "BEACON";

/// Values supplied on the command line. They take precedence over the file
/// and the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub mode: Option<Mode>,
}

/// Configuration file read when no path is given, if it exists. `beacon
/// init` writes it.
pub const DEFAULT_CONFIG_PATH: &str = "beacon.toml";

/// Load configuration using the config crate.
///
/// Sources are layered defaults → file → environment → `overrides`. File
/// formats: YAML, JSON, TOML, INI (by extension, YAML otherwise). Without
/// `path`, [`DEFAULT_CONFIG_PATH`] is used when present.
pub async fn load_config(path: Option<&str>, overrides: &ConfigOverrides) -> Result<ServerConfig> {
    load_config_sync(path, overrides)
}

/// Load configuration synchronously
pub fn load_config_sync(path: Option<&str>, overrides: &ConfigOverrides) -> Result<ServerConfig> {
    load_layered(path, DEFAULT_CONFIG_PATH, overrides)
}

fn file_format(path: &Path) -> FileFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("toml") => FileFormat::Toml,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Yaml, // Default to YAML
    }
}

fn file_source(path: &str) -> Result<File<config::FileSourceFile, FileFormat>> {
    let as_path = Path::new(path);
    let name = as_path
        .to_str()
        .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", as_path.display()))?;
    Ok(File::new(name, file_format(as_path)))
}

/// An explicit `path` must exist; `fallback` is read only if it does.
fn load_layered(
    path: Option<&str>,
    fallback: &str,
    overrides: &ConfigOverrides,
) -> Result<ServerConfig> {
    let mut builder = Config::builder();

    builder = match path {
        Some(config_path) => builder.add_source(file_source(config_path)?),
        None => builder.add_source(file_source(fallback)?.required(false)),
    };

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    builder = builder
        .set_override_option("host", overrides.host.clone())?
        .set_override_option("port", overrides.port.map(i64::from))?
        .set_override_option("mode", overrides.mode.map(|m| m.to_string()))?;

    let settings = builder
        .build()
        .with_context(|| format!("Failed to build config from {}", path.unwrap_or("<defaults>")))?;

    let server_config: ServerConfig = settings
        .try_deserialize()
        .with_context(|| format!("Failed to deserialize config from {}", path.unwrap_or("<defaults>")))?;

    Ok(server_config)
}
