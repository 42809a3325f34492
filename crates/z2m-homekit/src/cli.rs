//! Clap derive structures for the `z2m-homekit` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// z2m-homekit -- bridge zigbee2mqtt devices into HomeKit
#[derive(Debug, Parser)]
#[command(
    name = "z2m-homekit",
    version,
    about = "Bridge zigbee2mqtt devices to HomeKit and the browser",
    long_about = "Mirrors zigbee2mqtt device state into HomeKit accessories and a live web view,\n\
        and routes control commands back to the devices over MQTT.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Path to the TOML configuration file
    #[arg(long, short = 'c', env = "Z2M_HOMEKIT_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Path to the device registry (overrides `devices_config`)
    #[arg(long, short = 'd', global = true)]
    pub devices: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log output format (overrides `log_format`)
    #[arg(long, global = true)]
    pub log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    Json,
    /// Human-readable lines
    Console,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table
    Table,
    /// Pretty-printed JSON
    Json,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the bridge until interrupted
    Run,

    /// Validate the configuration and device registry
    Check,

    /// List registered devices
    #[command(alias = "ls")]
    Devices(DevicesArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct DevicesArgs {
    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    pub output: OutputFormat,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
