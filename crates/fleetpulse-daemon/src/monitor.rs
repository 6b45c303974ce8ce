//! Liveness monitor: the async shell around the debounce state machine.
//!
//! One [`NotificationState`] per client, each behind its own mutex, created on
//! first use and kept for the process lifetime. Config lookups happen before
//! a client lock is taken; message dispatch and persistence happen after it
//! is released, in detached tasks. A disconnect that starts a grace timer
//! spawns one delayed evaluation; that evaluation decides at fire time whether
//! it is still authoritative (see `fleetpulse_core::liveness`).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use fleetpulse_core::liveness::{self, ExpiryOutcome};
use fleetpulse_core::{
    ClientDescriptor, ConnectOutcome, DisconnectOutcome, LivenessPhase, NotificationConfig,
    NotificationState, OutboundMessage, PendingToken,
};

use crate::dispatch::DispatchQueue;
use crate::providers::{ConfigProvider, RenewalChecker};

type SharedState = Arc<Mutex<NotificationState>>;

/// What the config provider knows about a client for one evaluation.
enum Resolution {
    NotFound,
    /// The store could not be reached; notifications are off for this call.
    Unavailable,
    Resolved {
        client: ClientDescriptor,
        /// `None` when notifications are disabled (globally, per client, or
        /// because the config lookup failed).
        config: Option<NotificationConfig>,
    },
}

pub struct LivenessMonitor {
    states: DashMap<String, SharedState>,
    config: Arc<dyn ConfigProvider>,
    renewal: Arc<dyn RenewalChecker>,
    queue: DispatchQueue,
}

impl LivenessMonitor {
    pub fn new(
        config: Arc<dyn ConfigProvider>,
        renewal: Arc<dyn RenewalChecker>,
        queue: DispatchQueue,
    ) -> Self {
        Self {
            states: DashMap::new(),
            config,
            renewal,
            queue,
        }
    }

    /// Handle a transport-level connect for `client_id`.
    ///
    /// Returns `None` when the client is unknown (nothing changes).
    pub async fn on_connect(&self, client_id: &str) -> Option<ConnectOutcome> {
        let (client, notify) = match self.resolve(client_id).await {
            Resolution::NotFound => return None,
            Resolution::Unavailable => (None, false),
            Resolution::Resolved { client, config } => (Some(client), config.is_some()),
        };

        let state = self.state_for(client_id);
        let outcome = {
            let mut guard = state.lock();
            liveness::on_connect(&mut guard)
        };

        match outcome {
            ConnectOutcome::FirstConnection => {
                tracing::debug!(client_id = %client_id, "first connection, online notification suppressed");
            }
            ConnectOutcome::ReconnectedWithinGrace => {
                tracing::debug!(client_id = %client_id, "reconnected within grace period");
            }
            ConnectOutcome::Online => {
                if let Some(client) = client {
                    self.spawn_renewal(client.clone());
                    if notify {
                        self.queue.enqueue(OutboundMessage::online(&client));
                    } else {
                        tracing::debug!(client_id = %client_id, "online, notifications disabled");
                    }
                }
            }
        }
        Some(outcome)
    }

    /// Handle a transport-level disconnect for `client_id`.
    ///
    /// Clients that are unknown or have notifications disabled never get
    /// pending-offline state; `None` is returned for them.
    pub async fn on_disconnect(&self, client_id: &str) -> Option<DisconnectOutcome> {
        let (client, config) = match self.resolve(client_id).await {
            Resolution::Resolved {
                client,
                config: Some(config),
            } => (client, config),
            _ => return None,
        };

        let now = Utc::now();
        let state = self.state_for(client_id);
        let outcome = {
            let mut guard = state.lock();
            liveness::on_disconnect(&mut guard, now)
        };

        match outcome {
            DisconnectOutcome::AlreadyPending => {
                tracing::debug!(client_id = %client_id, "disconnect while already pending offline");
            }
            DisconnectOutcome::Scheduled(token) => {
                let grace = config.grace_period();
                tracing::debug!(
                    client_id = %client_id,
                    grace_secs = grace.as_secs(),
                    "pending offline, evaluation scheduled"
                );
                tokio::spawn(evaluate_after_grace(
                    state,
                    token,
                    grace,
                    client,
                    Arc::clone(&self.config),
                    self.queue.clone(),
                ));
            }
        }
        Some(outcome)
    }

    /// Current phase for `client_id`, if any state has been created.
    pub fn phase(&self, client_id: &str) -> Option<LivenessPhase> {
        self.states.get(client_id).map(|entry| entry.lock().phase())
    }

    /// Drop the state for a client that was deleted. A pending evaluation
    /// for it still fires but acts on the detached state only.
    pub fn purge(&self, client_id: &str) -> bool {
        self.states.remove(client_id).is_some()
    }

    pub fn tracked_clients(&self) -> usize {
        self.states.len()
    }

    fn state_for(&self, client_id: &str) -> SharedState {
        if let Some(existing) = self.states.get(client_id) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .states
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(NotificationState::new())));
        Arc::clone(entry.value())
    }

    async fn resolve(&self, client_id: &str) -> Resolution {
        let client = match self.config.get_client(client_id).await {
            Ok(Some(client)) => client,
            Ok(None) => {
                tracing::debug!(client_id = %client_id, "liveness event for unknown client ignored");
                return Resolution::NotFound;
            }
            Err(e) => {
                tracing::warn!(client_id = %client_id, error = %e, "client lookup failed");
                return Resolution::Unavailable;
            }
        };

        let config = self.notification_config(client_id).await;
        Resolution::Resolved { client, config }
    }

    async fn notification_config(&self, client_id: &str) -> Option<NotificationConfig> {
        match self.config.global_notifications_enabled().await {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read global notification switch");
                return None;
            }
        }

        match self.config.get_or_create_client_config(client_id).await {
            Ok(conf) if conf.enabled => Some(conf),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    client_id = %client_id,
                    error = %e,
                    "failed to get or create notification config"
                );
                None
            }
        }
    }

    fn spawn_renewal(&self, client: ClientDescriptor) {
        let renewal = Arc::clone(&self.renewal);
        tokio::spawn(async move {
            renewal.check_and_renew(&client).await;
        });
    }
}

async fn evaluate_after_grace(
    state: SharedState,
    token: PendingToken,
    grace: Duration,
    client: ClientDescriptor,
    config: Arc<dyn ConfigProvider>,
    queue: DispatchQueue,
) {
    tokio::time::sleep(grace).await;

    let outcome = {
        let mut guard = state.lock();
        liveness::on_grace_expired(&mut guard, token)
    };

    if outcome == ExpiryOutcome::Stale {
        tracing::debug!(client_id = %client.uuid, "stale offline evaluation skipped");
        return;
    }

    tracing::info!(client_id = %client.uuid, since = %token.since, "client offline");
    queue.enqueue(OutboundMessage::offline(&client));

    if let Err(e) = config.update_last_notified(&client.uuid, token.since).await {
        tracing::warn!(client_id = %client.uuid, error = %e, "failed to update last_notified");
    }
}
