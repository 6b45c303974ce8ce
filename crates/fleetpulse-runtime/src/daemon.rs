//! Daemon wiring: store, dispatch worker, liveness monitor and the agent
//! WebSocket server, all sharing one cancellation token.

use std::sync::Arc;

use anyhow::Context;
use fleetpulse_core::ServiceConfig;
use fleetpulse_daemon::{
    AgentHub, ConfigProvider, DispatchQueue, LivenessMonitor, LogDispatcher, SqliteStore,
    StoreRenewalChecker, WsServer,
};
use tokio_util::sync::CancellationToken;

pub async fn run_daemon(config: ServiceConfig) -> anyhow::Result<()> {
    let addr = config.listen_addr()?;
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("failed to open database {}", config.database.display()))?
        .with_default_grace_period(config.default_grace_period_secs);

    let cancel = CancellationToken::new();
    let (queue, dispatch_worker) = DispatchQueue::spawn(
        config.dispatch_queue_capacity,
        Arc::new(LogDispatcher),
        cancel.child_token(),
    );

    let provider: Arc<dyn ConfigProvider> = Arc::new(store.clone());
    let monitor = Arc::new(LivenessMonitor::new(
        Arc::clone(&provider),
        Arc::new(StoreRenewalChecker::new(store)),
        queue,
    ));
    let hub = Arc::new(AgentHub::new(monitor, provider));
    let server =
        WsServer::new(addr, hub, cancel.clone()).with_max_connections(config.max_connections);
    let (listener, local_addr) = server.bind().await?;
    tracing::info!(
        addr = %local_addr,
        database = %config.database.display(),
        default_grace_secs = config.default_grace_period_secs,
        "fleetpulse daemon ready"
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => tracing::warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        shutdown.cancel();
    });

    server.serve(listener).await?;

    cancel.cancel();
    if let Err(e) = dispatch_worker.await {
        tracing::warn!(error = %e, "dispatch worker ended abnormally");
    }
    tracing::info!("fleetpulse daemon stopped");
    Ok(())
}
