//! ssrelay - Encrypting SOCKS5 Relay Client
//!
//! Accepts SOCKS5 connections on a local port and tunnels them, stream
//! encrypted, to a remote relay server.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ssrelay::{config::ConfigManager, RelayManager};

/// CLI arguments for ssrelay
#[derive(Parser, Debug)]
#[command(name = "ssrelay")]
#[command(about = "ssrelay - Encrypting SOCKS5 Relay Client")]
#[command(version)]
#[command(long_about = "
ssrelay - Encrypting SOCKS5 Relay Client

Accepts SOCKS5 connections on a local port and tunnels them, stream
encrypted, to a remote relay server.

Configuration priority (highest to lowest):
1. Command-line arguments
2. Configuration file
3. Environment variables
4. Built-in defaults

Environment variables:
  SSRELAY_SERVER        - Remote server hostname or address
  SSRELAY_SERVER_PORT   - Remote server port
  SSRELAY_LOCAL_PORT    - Local SOCKS5 listen port
  SSRELAY_METHOD        - Cipher method (e.g., aes-256-cfb, chacha20)
  SSRELAY_PASSWORD      - Shared password
  SSRELAY_TIMEOUT       - Idle timeout (e.g., 5m, 30s)
  SSRELAY_ONE_TIME_AUTH - Enable one-time-auth framing (true/false)
  SSRELAY_BUFFER_SIZE   - Buffer size in bytes
  SSRELAY_LOG_LEVEL     - Log level (trace, debug, info, warn, error)
")]
pub struct CliArgs {
    /// Configuration file path
    #[arg(
        short,
        long,
        default_value = "config.toml",
        help = "Path to configuration file"
    )]
    pub config: PathBuf,

    /// Remote server hostname or address (overrides config file)
    #[arg(short, long, help = "Remote server hostname or address")]
    pub server: Option<String>,

    /// Remote server port (overrides config file)
    #[arg(long, help = "Remote server port")]
    pub server_port: Option<u16>,

    /// Local SOCKS5 listen port (overrides config file)
    #[arg(short, long, help = "Local SOCKS5 listen port")]
    pub local_port: Option<u16>,

    /// Cipher method (overrides config file)
    #[arg(short, long, help = "Cipher method, e.g. aes-256-cfb")]
    pub method: Option<String>,

    /// Shared password (overrides config file)
    #[arg(short, long, help = "Shared password")]
    pub password: Option<String>,

    /// Enable one-time-auth framing (overrides config file)
    #[arg(long, help = "Enable one-time-auth framing")]
    pub one_time_auth: bool,

    /// Idle timeout in seconds (overrides config file)
    #[arg(long, help = "Idle timeout in seconds")]
    pub timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", help = "Log level")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long, help = "Enable verbose logging")]
    pub verbose: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration and exit")]
    pub validate_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    // Initialize tracing
    init_tracing(&args)?;

    info!("Starting ssrelay v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration with priority: CLI args > config file > environment > defaults
    let mut config = if args.config.exists() {
        ConfigManager::load_from_file(&args.config)?
    } else {
        info!("Config file not found, checking environment variables");
        ConfigManager::load_from_env()?
    };

    // Apply CLI argument overrides (highest priority)
    config.merge_with_cli_args(
        args.server.as_deref(),
        args.server_port,
        args.local_port,
        args.method.as_deref(),
        args.password.as_deref(),
        args.one_time_auth,
        args.timeout,
    );

    // Final validation after all overrides
    config
        .validate()
        .context("Final configuration validation failed")?;

    // If validate-config flag is set, just validate and exit
    if args.validate_config {
        info!("Configuration is valid");
        info!("Configuration summary:");
        info!(
            "  Server: {}:{}",
            config.profile.server, config.profile.server_port
        );
        info!("  Local port: {}", config.profile.local_port);
        info!("  Cipher method: {}", config.profile.method);
        info!("  Idle timeout: {:?}", config.profile.timeout);
        info!(
            "  One-time-auth: {}",
            if config.profile.one_time_auth {
                "enabled"
            } else {
                "disabled"
            }
        );
        return Ok(());
    }

    let manager = RelayManager::bind(config).await?;

    tokio::select! {
        result = manager.run() => {
            if let Err(e) = result {
                error!("Relay error: {:#}", e);
            }
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Error waiting for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            manager.terminate();
        }
    }

    info!("Relay shutdown complete");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(args: &CliArgs) -> Result<()> {
    let log_level = if args.verbose {
        "debug"
    } else {
        &args.log_level
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true),
        )
        .with(env_filter)
        .init();

    Ok(())
}
