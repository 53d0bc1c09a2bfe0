use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use webradar::shutdown::spawn_signal_handlers;
use webradar::{init_logging, LogOptions, RelayServerBuilder, WebradarConfig};

#[derive(Parser, Debug)]
#[command(name = "webradar")]
#[command(about = "Websocket broadcast relay for live radar telemetry")]
#[command(version)]
#[command(long_about = "Accepts websocket connections on a single path and forwards every \
message a peer sends, unmodified, to every other connected peer. Peers are optionally \
authorized with a shared key passed as a query parameter, and unresponsive peers are \
pruned by a periodic heartbeat.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "webradar.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting the relay")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the shared key peers must present
    #[arg(short, long)]
    key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _log_guard = init_logging(&LogOptions {
        debug: args.debug,
        verbose: args.verbose,
        quiet: args.quiet,
        format: args.log_format.clone(),
        file: args.log_file.clone(),
    })?;

    info!("Starting webradar relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match WebradarConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(port) = args.port {
        config.relay.port = port;
    }
    if let Some(key) = args.key {
        config.relay.key = key;
    }

    match config.validate() {
        Ok(()) if args.validate_config => {
            println!("✓ Configuration is valid");
            return Ok(());
        }
        Ok(()) => {}
        Err(e) => {
            error!("Configuration validation failed: {}", e);
            eprintln!("✗ Configuration validation failed: {}", e);
            std::process::exit(1);
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    let server = RelayServerBuilder::new()
        .config(config.relay)
        .shutdown(shutdown)
        .build()?;

    server.start().await.map_err(|e| {
        error!("Relay error: {}", e);
        e
    })?;

    info!("Webradar relay exited");
    Ok(())
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# Webradar Configuration File");
    println!("# This is the default configuration with all available options.");
    println!("# Any value can be overridden with WEBRADAR_<SECTION>__<KEY>, e.g. WEBRADAR_RELAY__KEY.");
    println!();
    println!("{}", toml::to_string_pretty(&WebradarConfig::default())?);
    Ok(())
}
