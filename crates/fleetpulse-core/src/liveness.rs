//! Debounced liveness state machine for a single client.
//!
//! Decides when a disconnect becomes a real "offline" event and when a
//! reconnect becomes a real "online" event:
//!
//! - **First connection**: the first connect ever observed is silent, so a
//!   service restart (every agent reconnecting) produces no online burst.
//! - **Flap suppression**: a reconnect while an offline evaluation is pending
//!   cancels it and is itself silent.
//! - **Offline authority**: a delayed evaluation only fires if the pending
//!   marker it captured is still the current one. A reconnect clears the
//!   marker; a later disconnect replaces it. Either way the old evaluation
//!   finds a mismatch and does nothing, so scheduled timers never need to be
//!   cancelled.
//!
//! All functions here are pure: the caller passes `now`, holds whatever lock
//! protects the state, and performs side effects based on the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker captured when a disconnect starts the grace timer.
///
/// `since` is the disconnect time; `epoch` disambiguates two disconnects that
/// read the same clock value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingToken {
    pub since: DateTime<Utc>,
    pub epoch: u64,
}

/// Observable phase of a client, derived from [`NotificationState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum LivenessPhase {
    /// No connect has been processed yet.
    Unknown,
    Online,
    PendingOffline { since: DateTime<Utc> },
    /// Offline notification sent; the next connect always leaves this phase.
    OfflineNotified,
}

/// Per-client debounce state. Created lazily, lives for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationState {
    pending_offline: Option<PendingToken>,
    is_first_connection: bool,
    offline_notified: bool,
    epoch: u64,
}

impl Default for NotificationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationState {
    pub fn new() -> Self {
        Self {
            pending_offline: None,
            is_first_connection: true,
            offline_notified: false,
            epoch: 0,
        }
    }

    pub fn pending_offline(&self) -> Option<PendingToken> {
        self.pending_offline
    }

    pub fn is_first_connection(&self) -> bool {
        self.is_first_connection
    }

    pub fn phase(&self) -> LivenessPhase {
        if let Some(token) = self.pending_offline {
            return LivenessPhase::PendingOffline { since: token.since };
        }
        if self.offline_notified {
            return LivenessPhase::OfflineNotified;
        }
        if self.is_first_connection {
            return LivenessPhase::Unknown;
        }
        LivenessPhase::Online
    }
}

/// Result of processing a connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// First connect ever observed: silent.
    FirstConnection,
    /// Reconnected while an offline evaluation was pending: silent.
    ReconnectedWithinGrace,
    /// Came back after an offline notification, or was never disconnected:
    /// an online notification is due.
    Online,
}

impl ConnectOutcome {
    pub fn should_notify(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// Result of processing a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A grace timer is already running; nothing changes.
    AlreadyPending,
    /// A new grace timer must be scheduled for this token.
    Scheduled(PendingToken),
}

/// Result of a delayed evaluation firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryOutcome {
    /// The token no longer matches: reconnected, or superseded by a newer
    /// disconnect. No side effects.
    Stale,
    /// The token is authoritative: the offline notification is due.
    Offline,
}

/// Apply a connect event.
pub fn on_connect(state: &mut NotificationState) -> ConnectOutcome {
    if state.is_first_connection {
        state.is_first_connection = false;
        state.pending_offline = None;
        state.offline_notified = false;
        return ConnectOutcome::FirstConnection;
    }

    let was_pending = state.pending_offline.take().is_some();
    state.offline_notified = false;

    if was_pending {
        ConnectOutcome::ReconnectedWithinGrace
    } else {
        ConnectOutcome::Online
    }
}

/// Apply a disconnect event observed at `now`.
///
/// Only the first disconnect since the last online transition starts a timer.
pub fn on_disconnect(state: &mut NotificationState, now: DateTime<Utc>) -> DisconnectOutcome {
    if state.pending_offline.is_some() {
        return DisconnectOutcome::AlreadyPending;
    }
    state.epoch = state.epoch.wrapping_add(1);
    let token = PendingToken {
        since: now,
        epoch: state.epoch,
    };
    state.pending_offline = Some(token);
    DisconnectOutcome::Scheduled(token)
}

/// Apply the delayed evaluation scheduled for `token`.
pub fn on_grace_expired(state: &mut NotificationState, token: PendingToken) -> ExpiryOutcome {
    match state.pending_offline {
        Some(current) if current == token => {
            state.pending_offline = None;
            state.offline_notified = true;
            ExpiryOutcome::Offline
        }
        _ => ExpiryOutcome::Stale,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
