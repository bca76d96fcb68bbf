use std::{path::Path, sync::Arc};

use beacon::{
    HttpServer, ProcessHealth, PrometheusSource, Server, ServerError,
    config::{ConfigOverrides, DEFAULT_CONFIG_PATH, Mode, ServerConfigValidator, load_config},
    metrics, tracing_setup,
    utils::GracefulShutdown,
};
use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    /// Configuration file (YAML, TOML, JSON or INI); defaults to ./beacon.toml if present
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// Override the listen host
    #[clap(long, global = true)]
    host: Option<String>,

    /// Override the listen port
    #[clap(short, long, global = true)]
    port: Option<u16>,

    /// Override the operating mode (development, production, test)
    #[clap(short, long, global = true)]
    mode: Option<Mode>,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Start the server (default)
    Serve,
    /// Validate the effective configuration
    Validate,
    /// Write a commented default configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();
    let overrides = ConfigOverrides {
        host: args.host.clone(),
        port: args.port,
        mode: args.mode,
    };
    let config_path = args.config.as_deref();

    match args.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve_command(config_path, &overrides).await,
        Commands::Validate => validate_config_command(config_path, &overrides).await,
        Commands::Init => init_config_command(config_path.unwrap_or(DEFAULT_CONFIG_PATH)).await,
    }
}

async fn serve_command(config_path: Option<&str>, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(config_path, overrides).await?;
    ServerConfigValidator::validate(&config).wrap_err("Invalid configuration")?;

    tracing_setup::init_tracing(&config.logging, config.mode)?;

    let metrics_source = Arc::new(PrometheusSource::install()?);
    metrics::init_metrics()?;
    let health = Arc::new(ProcessHealth::new(config.mode));
    let server = Arc::new(
        Server::new(config, metrics_source, health).wrap_err("Failed to construct server")?,
    );

    let shutdown = GracefulShutdown::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "signal handler failed");
            }
        })
    };
    let stopper = tokio::spawn(stop_on_signal(server.clone(), shutdown.clone()));

    let served = server.start().await;
    signals.abort();
    if let Err(e) = served {
        stopper.abort();
        return Err(e).wrap_err("Server failed");
    }

    match stopper.await {
        Ok(result) => result.wrap_err("Shutdown did not complete cleanly"),
        Err(e) => Err(eyre!("Shutdown task failed: {e}")),
    }
}

/// Stop `server` once a shutdown signal arrives.
async fn stop_on_signal<S: HttpServer>(
    server: Arc<S>,
    shutdown: GracefulShutdown,
) -> std::result::Result<(), ServerError> {
    let reason = shutdown.wait_for_shutdown_signal().await;
    tracing::info!(?reason, "shutdown requested");
    server.stop(None).await
}

/// Validate the effective configuration and print a summary
async fn validate_config_command(
    config_path: Option<&str>,
    overrides: &ConfigOverrides,
) -> Result<()> {
    if let Some(path) = config_path {
        println!("🔍 Validating configuration file: {path}");
        if !Path::new(path).exists() {
            eprintln!("❌ Error: Configuration file '{path}' not found");
            std::process::exit(1);
        }
    } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
        println!("🔍 Validating configuration file: {DEFAULT_CONFIG_PATH}");
    } else {
        println!("🔍 Validating configuration from defaults and environment");
    }

    let config = match load_config(config_path, overrides).await {
        Ok(config) => {
            println!("✅ Configuration parsing: OK");
            config
        }
        Err(e) => {
            eprintln!("❌ Configuration parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ServerConfigValidator::validate(&config) {
        Ok(()) => {
            println!("✅ Configuration validation: OK");
            println!();
            println!("📋 Configuration Summary:");
            println!("   • Listen Address: {}", config.listen_addr());
            println!("   • Mode: {}", config.mode);
            println!(
                "   • Timeouts: read {}s, write {}s, idle {}s, shutdown {}s",
                config.read_timeout_secs,
                config.write_timeout_secs,
                config.idle_timeout_secs,
                config.shutdown_timeout_secs
            );
            println!("   • CORS Enabled: {}", config.enable_cors);
            if config.enable_rate_limit {
                println!(
                    "   • Rate Limit: {} requests per {}",
                    config.rate_limit.requests, config.rate_limit.period
                );
            } else {
                println!("   • Rate Limit: disabled");
            }
            println!("   • Diagnostics Enabled: {}", config.enable_diagnostics);
            println!();
            println!("🎉 Configuration is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Configuration validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Use a bare host name or IP address (no http://)");
            println!("   • Ports must be between 1 and 65535");
            println!("   • Timeouts must be at least 1 second");
            println!("   • Rate limit periods use humantime units (e.g. 30s, 1m)");
            std::process::exit(1);
        }
    }
}

/// Initialize a new configuration file
async fn init_config_command(config_path: &str) -> Result<()> {
    let path = Path::new(config_path);
    if path.exists() {
        eprintln!("❌ Error: Configuration file '{config_path}' already exists");
        std::process::exit(1);
    }

    let default_config = r#"# Beacon configuration
#
# Every key is optional. Environment variables override this file, e.g.
# BEACON_PORT=9200 or BEACON_RATE_LIMIT__REQUESTS=50.

host = "0.0.0.0"
port = 9100

# development | production | test
mode = "production"

# Timeouts in seconds
read_timeout_secs = 10
write_timeout_secs = 10
idle_timeout_secs = 60
shutdown_timeout_secs = 30

# Expose /debug/vars, /debug/config and /debug/connections
enable_diagnostics = false
enable_cors = false
enable_rate_limit = false

[rate_limit]
requests = 100
period = "1m"
cleanup_interval = "5m"

[logging]
# EnvFilter directive; RUST_LOG takes precedence
level = "info"
# json | pretty (defaults to json in production, pretty otherwise)
# format = "json"
"#;

    tokio::fs::write(path, default_config)
        .await
        .context("Failed to write config file")?;
    println!("✅ Created default configuration at: {config_path}");
    if config_path == DEFAULT_CONFIG_PATH {
        println!("   Run 'beacon serve' from this directory to start the server");
    } else {
        println!("   Run 'beacon --config {config_path} serve' to start the server");
    }
    Ok(())
}
