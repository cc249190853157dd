// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! FUSE bridge host: mount point maintenance from the command line
//!
//! Clears stale mounts, probes mount points and previews the option string a
//! JSON mount configuration produces.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fuse_bridge_core::{force_unmount, probe_stale, resolve_mountpoint, MountConfig, Opcode};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fuse-bridge-host", version, about)]
struct Args {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, global = true, env = "FUSE_BRIDGE_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Force the platform unmount of a mount point
    Unmount {
        mount_point: PathBuf,
    },
    /// Report whether a mount point is left over from a dead process
    Probe {
        mount_point: PathBuf,
    },
    /// Print the mount option string and per-operation timeouts
    Options {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Mount point used for volume naming
        #[arg(default_value = ".")]
        mount_point: PathBuf,
    },
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_config(config_path: Option<&Path>) -> Result<MountConfig> {
    match config_path {
        Some(path) => MountConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(MountConfig::default()),
    }
}

/// Resolved timeout per operation in milliseconds, `null` when disabled.
fn timeout_table(config: &MountConfig) -> Value {
    let table: Map<String, Value> = Opcode::ALL
        .iter()
        .map(|op| {
            let millis = config
                .timeout
                .resolve(*op)
                .map_or(Value::Null, |d| Value::from(d.as_millis() as u64));
            (op.name().to_string(), millis)
        })
        .collect();
    Value::Object(table)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.debug);

    match args.command {
        Command::Unmount { mount_point } => {
            force_unmount(&mount_point)
                .await
                .with_context(|| format!("unmounting {}", mount_point.display()))?;
            info!("Unmounted {}", mount_point.display());
        }
        Command::Probe { mount_point } => {
            if probe_stale(&mount_point).await {
                warn!("Stale mount at {}", mount_point.display());
                println!("stale");
            } else {
                println!("ok");
            }
        }
        Command::Options {
            config,
            mount_point,
        } => {
            let config = load_config(config.as_deref())?;
            let mount_point = resolve_mountpoint(&mount_point)?;
            println!("{}", config.option_string(&mount_point));
            println!("{}", serde_json::to_string_pretty(&timeout_table(&config))?);
        }
    }

    Ok(())
}
