//! Offline administration commands that operate on the SQLite store
//! directly. A running daemon picks up changes on its next lookup.

use std::fmt::Write as _;

use anyhow::{Context, bail};
use fleetpulse_core::{ClientDescriptor, NotificationConfig};
use fleetpulse_daemon::SqliteStore;

use crate::cli::{ClientAddOpts, ClientCommand, NotifyClientOpts, NotifyCommand};

pub fn run_client(store: &SqliteStore, cmd: ClientCommand) -> anyhow::Result<String> {
    match cmd {
        ClientCommand::Add(opts) => add_client(store, opts),
        ClientCommand::Remove { uuid } => {
            if !store.remove_client(&uuid)? {
                bail!("no such client: {uuid}");
            }
            tracing::info!(client_id = %uuid, "client removed");
            Ok(format!("removed {uuid}\n"))
        }
        ClientCommand::List => {
            let mut rows = Vec::new();
            for client in store.list_clients()? {
                let config = store.client_config(&client.uuid)?;
                rows.push((client, config));
            }
            Ok(format_client_list(&rows))
        }
    }
}

fn add_client(store: &SqliteStore, opts: ClientAddOpts) -> anyhow::Result<String> {
    if opts.auto_renewal && opts.billing_cycle_days == 0 {
        bail!("--auto-renewal needs --billing-cycle-days greater than 0");
    }
    let mut client = ClientDescriptor::new(opts.uuid, opts.name);
    client.auto_renewal = opts.auto_renewal;
    client.billing_cycle_days = opts.billing_cycle_days;
    client.expired_at = opts.expires_at;
    store
        .upsert_client(&client)
        .with_context(|| format!("failed to save client {}", client.uuid))?;
    tracing::info!(client_id = %client.uuid, name = %client.name, "client saved");
    Ok(format!("saved {} ({})\n", client.uuid, client.display_name()))
}

pub fn run_notify(store: &SqliteStore, cmd: NotifyCommand) -> anyhow::Result<String> {
    match cmd {
        NotifyCommand::Global { state } => {
            store.set_notifications_enabled(state.enabled())?;
            let word = if state.enabled() { "on" } else { "off" };
            Ok(format!("offline notifications {word}\n"))
        }
        NotifyCommand::Client(opts) => notify_client(store, opts),
    }
}

fn notify_client(store: &SqliteStore, opts: NotifyClientOpts) -> anyhow::Result<String> {
    if store.get_client(&opts.uuid)?.is_none() {
        bail!("no such client: {}", opts.uuid);
    }
    if let Some(grace) = opts.grace {
        if grace <= 0 {
            bail!("--grace must be a positive number of seconds");
        }
    }
    let config = store.set_client_notification(&opts.uuid, opts.enabled(), opts.grace)?;
    Ok(format_config(&config))
}

fn format_config(config: &NotificationConfig) -> String {
    format!(
        "{}: notify={} grace={}s\n",
        config.client,
        if config.enabled { "on" } else { "off" },
        config.grace_period_secs
    )
}

fn format_client_list(rows: &[(ClientDescriptor, NotificationConfig)]) -> String {
    if rows.is_empty() {
        return "no clients\n".to_string();
    }
    let mut out = String::new();
    for (client, config) in rows {
        let expires = client
            .expired_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "{}\t{}\tnotify={}\tgrace={}s\tauto_renewal={}\texpires={}",
            client.uuid,
            client.display_name(),
            if config.enabled { "on" } else { "off" },
            config.grace_period_secs,
            client.auto_renewal,
            expires,
        );
    }
    out
}
