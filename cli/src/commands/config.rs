// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use humantime::format_duration;
use std::path::PathBuf;

use keystone_engine::domain::agent_config::{AgentConfig, CONFIG_PATH_ENV};

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

/// `config` is the configuration loaded at startup; `FILE` arguments are
/// loaded on their own.
pub async fn handle_command(
    command: ConfigCommand,
    config: Result<AgentConfig>,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config?, config_override, paths).await,
        ConfigCommand::Validate { file: Some(file) } => validate(Some(file)).await,
        ConfigCommand::Validate { file: None } => {
            println!("Validating configuration...");
            check(config?)
        }
    }
}

async fn show(config: AgentConfig, config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./keystone-config.yaml");
        println!("  4. ~/.keystone/config.yaml");
        println!("  5. /etc/keystone/config.yaml");
        if config_override.is_none() {
            match AgentConfig::discover_config() {
                Some(path) => println!("  Using: {}", path.display().to_string().green()),
                None => println!("  Using: {}", "built-in defaults".dimmed()),
            }
        }
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    println!("{}", "Engine:".bold());
    println!("  Backoff: {:?}", config.engine.backoff);
    println!("  Bounce delay: {}", format_duration(config.engine.bounce_delay));
    println!("  Event capacity: {}", config.engine.event_capacity);
    println!();

    println!("{}", "Logging:".bold());
    println!("  Level: {}", config.logging.level);
    println!("  Format: {:?}", config.logging.format);
    println!();

    println!("{}", "Heartbeat:".bold());
    println!("  Interval: {}", format_duration(config.heartbeat.interval));
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AgentConfig::load_or_default(config_path).context("Failed to load configuration")?;

    check(config)
}

fn check(config: AgentConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}
