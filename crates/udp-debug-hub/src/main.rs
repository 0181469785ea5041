// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! UDP Debug Hub CLI
//!
//! # Usage
//!
//! ```bash
//! # Defaults: HTTP on 0.0.0.0:8080, debug UDP server port 9090
//! udp-debug-hub
//!
//! # Serve the dashboard build as well
//! udp-debug-hub --static-dir web/dist
//!
//! # Using configuration file
//! udp-debug-hub --config hub.toml
//!
//! # Write a default configuration file
//! udp-debug-hub gen-config --output hub.toml
//! ```

use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use udp_debug_hub::{ConfigError, DebugHub, HubConfig, TransportMode};

/// UDP Debug Hub - live state backend for the UDP debug dashboard
#[derive(Parser, Debug)]
#[command(name = "udp-debug-hub")]
#[command(about = "Live state and viewer broadcast backend for the UDP debug dashboard")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP bind address
    #[arg(short, long, default_value = "0.0.0.0", conflicts_with = "config")]
    bind: IpAddr,

    /// HTTP port
    #[arg(long, default_value = "8080", conflicts_with = "config")]
    http_port: u16,

    /// Debug UDP server port
    #[arg(long, default_value = "9090", conflicts_with = "config")]
    udp_port: u16,

    /// Host the debug clients dial
    #[arg(long, default_value = "127.0.0.1", conflicts_with = "config")]
    udp_host: String,

    /// Transport: udp (sockets) or intra (in-process)
    #[arg(short, long, value_enum, default_value_t = TransportMode::Udp, conflicts_with = "config")]
    transport: TransportMode,

    /// Shutdown timeout (seconds)
    #[arg(long, default_value = "10", conflicts_with = "config")]
    shutdown_timeout: u64,

    /// Directory with the dashboard build, served at /
    #[arg(long, conflicts_with = "config")]
    static_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "hub.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if let Some(cmd) = args.command {
        init_logging(&args.log_level);
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    // A config file may carry its own log level.
    let config = build_config(&args)?;
    init_logging(&config.log_level);
    if let Some(path) = &args.config {
        info!("Loaded config from {:?}", path);
    }
    print_banner(&config);

    let mut hub = DebugHub::bind(config).await?;
    hub.run().await?;

    wait_for_signal().await;
    info!("Shutdown signal received, stopping hub...");

    let outcome = hub.shutdown().await?;
    if !outcome.drained {
        warn!("Some background tasks were still running at exit");
    }
    info!("UDP debug hub stopped");
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_config(args: &Args) -> Result<HubConfig, ConfigError> {
    if let Some(ref path) = args.config {
        return HubConfig::from_file(path);
    }

    let config = HubConfig {
        bind_address: args.bind,
        http_port: args.http_port,
        udp_port: args.udp_port,
        udp_host: args.udp_host.clone(),
        transport: args.transport,
        shutdown_timeout_secs: args.shutdown_timeout,
        static_dir: args.static_dir.clone(),
        log_level: args.log_level.clone(),
        ..Default::default()
    };
    config.validate()?;
    Ok(config)
}

fn print_banner(config: &HubConfig) {
    info!("+----------------------------------------------------+");
    info!(
        "|       UDP Debug Hub v{}                       |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  HTTP:      {:38} |", config.http_addr());
    info!("|  UDP port:  {:38} |", config.udp_port);
    info!("|  Transport: {:38} |", config.transport.to_string());
    info!(
        "|  Shutdown:  {:38} |",
        format!("{}s", config.shutdown_timeout_secs)
    );
    if let Some(dir) = &config.static_dir {
        info!("|  Static:    {:38} |", dir.display().to_string());
    }
    info!("+----------------------------------------------------+");
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let toml_str = toml::to_string_pretty(&HubConfig::default())?;
    let content = format!(
        r#"# UDP Debug Hub Configuration
# Generated by udp-debug-hub gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match HubConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("HTTP:      {}", config.http_addr());
            println!("UDP port:  {}", config.udp_port);
            println!("Transport: {}", config.transport);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}
