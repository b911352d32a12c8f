// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Keystone Agent Host CLI
//!
//! The `keystone` binary hosts an agent's workers under the dependency engine.
//!
//! ## Commands
//!
//! - `keystone run` - Run the built-in manifolds until Ctrl+C or SIGTERM
//! - `keystone config show|validate` - Configuration management
//!
//! A `.env` file in the working directory is loaded before arguments are parsed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use keystone_agent::commands::{self, ConfigCommand};
use keystone_engine::domain::agent_config::{AgentConfig, LogFormat};

/// Keystone Agent Host - dependency-driven worker supervision
#[derive(Parser)]
#[command(name = "keystone")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "KEYSTONE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to logging.level
    #[arg(long, global = true, env = "KEYSTONE_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent until interrupted
    #[command(name = "run")]
    Run,

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = load_config(cli.config.clone(), cli.log_level.as_deref())?;
    let logging = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    let level = cli.log_level.as_deref().unwrap_or(&logging.level);
    init_logging(level, logging.format)?;

    match cli.command {
        Some(Commands::Run) => commands::run::handle_command(config?).await,
        Some(Commands::Config { command }) => commands::config::handle_command(command, config, cli.config).await,
        None => {
            // No command provided - show help
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Load the configuration once, logging discovery to stderr until the
/// configured subscriber is installed.
///
/// A broken config file is reported by the command that needs it.
fn load_config(path: Option<PathBuf>, level: Option<&str>) -> Result<Result<AgentConfig>> {
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level.unwrap_or("info"))?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    Ok(tracing::subscriber::with_default(bootstrap, || {
        AgentConfig::load_or_default(path).context("Failed to load configuration")
    }))
}

fn log_filter(level: &str) -> Result<tracing_subscriber::EnvFilter> {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: LogFormat) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    match format {
        LogFormat::Compact => subscriber.compact().init(),
        LogFormat::Json => subscriber.json().init(),
    }

    Ok(())
}
