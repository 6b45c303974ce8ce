//! fleetpulse: agent liveness monitor.
//!
//! `daemon` runs the agent endpoint; `client` and `notify` edit the store.

use clap::Parser;
use fleetpulse_core::ServiceConfig;
use fleetpulse_daemon::SqliteStore;

mod admin;
mod cli;
mod daemon;

fn init_tracing(default_filter: &str) {
    let filter = std::env::var("FLEETPULSE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();
}

/// File config with CLI overrides applied.
fn load_config(args: &cli::Cli) -> anyhow::Result<ServiceConfig> {
    let mut config = ServiceConfig::load(&args.config)?;
    if let Some(database) = &args.database {
        config.database = database.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let mut config = load_config(&args)?;

    match args.command {
        cli::Command::Daemon(opts) => {
            init_tracing("info");
            if let Some(listen) = opts.listen {
                config.listen = listen;
            }
            tracing::info!(config = %args.config.display(), "fleetpulse daemon starting");
            daemon::run_daemon(config).await?;
        }
        cli::Command::Client(cmd) => {
            init_tracing("warn");
            let store = SqliteStore::open(&config.database)?
                .with_default_grace_period(config.default_grace_period_secs);
            print!("{}", admin::run_client(&store, cmd)?);
        }
        cli::Command::Notify(cmd) => {
            init_tracing("warn");
            let store = SqliteStore::open(&config.database)?
                .with_default_grace_period(config.default_grace_period_secs);
            print!("{}", admin::run_notify(&store, cmd)?);
        }
    }

    Ok(())
}
