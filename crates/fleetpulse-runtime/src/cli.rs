//! CLI definition using clap derive.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "fleetpulse", about = "Agent liveness monitor with debounced offline notifications")]
pub struct Cli {
    /// Service config file (TOML). Missing file means defaults.
    #[arg(
        long,
        short = 'c',
        global = true,
        env = "FLEETPULSE_CONFIG",
        default_value = "fleetpulse.toml"
    )]
    pub config: PathBuf,

    /// SQLite database path, overrides `database` from the config file
    #[arg(long, global = true, env = "FLEETPULSE_DATABASE")]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the agent endpoint and liveness monitor until Ctrl-C
    Daemon(DaemonOpts),
    /// Manage registered clients
    #[command(subcommand)]
    Client(ClientCommand),
    /// Manage offline notification settings
    #[command(subcommand)]
    Notify(NotifyCommand),
}

#[derive(Debug, Args)]
pub struct DaemonOpts {
    /// Listen address, overrides `listen` from the config file
    #[arg(long, env = "FLEETPULSE_LISTEN")]
    pub listen: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum ClientCommand {
    /// Register a client, or update an existing one
    Add(ClientAddOpts),
    /// Delete a client and its notification settings
    Remove { uuid: String },
    /// List clients with their notification settings
    List,
}

#[derive(Debug, Args)]
pub struct ClientAddOpts {
    pub uuid: String,

    /// Display name used in notifications
    #[arg(long)]
    pub name: String,

    /// Extend the expiry by whole billing cycles when the client comes back
    /// online after expiring
    #[arg(long)]
    pub auto_renewal: bool,

    #[arg(long, default_value_t = 0)]
    pub billing_cycle_days: u32,

    /// Expiry timestamp (RFC 3339)
    #[arg(long)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Subcommand)]
pub enum NotifyCommand {
    /// Turn offline notifications on or off for every client
    Global {
        #[arg(value_enum)]
        state: Switch,
    },
    /// Change one client's notification settings
    Client(NotifyClientOpts),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn enabled(self) -> bool {
        self == Switch::On
    }
}

#[derive(Debug, Args)]
pub struct NotifyClientOpts {
    pub uuid: String,

    #[arg(long, conflicts_with = "disable")]
    pub enable: bool,

    #[arg(long)]
    pub disable: bool,

    /// Grace period in seconds before an offline notification is sent
    #[arg(long)]
    pub grace: Option<i64>,
}

impl NotifyClientOpts {
    /// `None` when neither flag was given.
    pub fn enabled(&self) -> Option<bool> {
        match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}
