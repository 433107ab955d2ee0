//! Clap derive structures for the `totosync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// totosync -- mirror a Totoro admin backend's live state
#[derive(Debug, Parser)]
#[command(
    name = "totosync",
    version,
    about = "Mirror a Totoro admin backend's live state as JSON lines",
    long_about = "Keeps a local view of device and service status in sync with a\n\
        Totoro admin backend over its push channel, falling back to REST\n\
        polling while the channel is down.",
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
    /// Backend profile to use
    #[arg(long, short = 'p', env = "TOTOSYNC_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Backend base URL (overrides profile)
    #[arg(long, short = 'e', env = "TOTOSYNC_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Bearer token (overrides the profile's token chain)
    #[arg(long, short = 't', env = "TOTOSYNC_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "TOTOSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Accept self-signed TLS certificates
    #[arg(long, short = 'k', global = true)]
    pub insecure: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sync with the backend and print one JSON line per state change
    Watch(WatchArgs),

    /// Inspect configuration
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Print the first baseline snapshot and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,
    /// Print the resolved profile (token redacted)
    Show,
}
