// Copyright (c) 2026 Keystone Contributors
// SPDX-License-Identifier: AGPL-3.0

//! `keystone run`: host the built-in manifolds until interrupted
//!
//! On exit the final engine report is printed to stdout as JSON.

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};

use crate::builtin;
use keystone_engine::domain::agent_config::AgentConfig;
use keystone_engine::Engine;

pub async fn handle_command(config: AgentConfig) -> Result<()> {
    config.validate().context("Configuration validation failed")?;

    let engine = Engine::new(config.engine.to_engine_config()).context("Failed to start engine")?;
    info!(engine_id = %engine.id(), "Keystone agent starting");

    engine
        .install_all(builtin::manifolds(&engine, config.heartbeat.interval))
        .await
        .context("Failed to install built-in manifolds")?;

    tokio::select! {
        signal = shutdown_signal() => signal?,
        _ = engine.wait() => warn!("Engine stopped on its own"),
    }

    engine.kill();
    let result = engine.wait().await;

    let report = engine.report().await.context("Failed to collect final report")?;
    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("Failed to serialize final report")?
    );

    result.context("Engine stopped with an error")
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("Failed to install Ctrl+C handler")?;
                info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM signal");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("Failed to install Ctrl+C handler")?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
