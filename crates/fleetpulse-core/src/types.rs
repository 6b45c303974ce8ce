use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Grace period applied when a client's configured value is unset or non-positive.
pub const DEFAULT_GRACE_PERIOD_SECS: i64 = 300;

// ─── Telemetry ────────────────────────────────────────────────────

/// Most recent telemetry pushed by an agent.
///
/// The payload is opaque to this crate; only the version is interpreted, and
/// only by the agent-facing decoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    #[serde(default)]
    pub version: u32,
    #[serde(default = "Utc::now")]
    pub received_at: DateTime<Utc>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Report {
    pub fn new(version: u32, payload: serde_json::Value, received_at: DateTime<Utc>) -> Self {
        Self {
            version,
            received_at,
            payload,
        }
    }
}

// ─── Clients ──────────────────────────────────────────────────────

/// The slice of a stored client record that liveness and renewal need.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientDescriptor {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub auto_renewal: bool,
    /// Billing cycle length in days; `0` disables renewal.
    #[serde(default)]
    pub billing_cycle_days: u32,
    #[serde(default)]
    pub expired_at: Option<DateTime<Utc>>,
}

impl ClientDescriptor {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            auto_renewal: false,
            billing_cycle_days: 0,
            expired_at: None,
        }
    }

    /// Name used in notification text. Falls back to the uuid.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.uuid
        } else {
            &self.name
        }
    }

    /// Next expiry if an auto-renewal is due at `now`, advancing by whole
    /// billing cycles until the expiry lies in the future.
    ///
    /// Returns `None` when auto-renewal is off, no cycle is configured, no
    /// expiry is recorded, or the expiry has not passed yet.
    pub fn renewal_due(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.auto_renewal || self.billing_cycle_days == 0 {
            return None;
        }
        let expiry = self.expired_at?;
        if expiry > now {
            return None;
        }
        let cycle_secs = i64::from(self.billing_cycle_days) * 86_400;
        let elapsed_cycles = u64::try_from((now - expiry).num_seconds() / cycle_secs).ok()?;
        let days = (elapsed_cycles + 1).checked_mul(u64::from(self.billing_cycle_days))?;
        expiry.checked_add_days(chrono::Days::new(days))
    }
}

// ─── Notification config ──────────────────────────────────────────

/// Persisted per-client offline/online notification settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub client: String,
    pub enabled: bool,
    /// Seconds; unset or non-positive means [`DEFAULT_GRACE_PERIOD_SECS`].
    pub grace_period_secs: i64,
    pub last_notified: Option<DateTime<Utc>>,
}

impl NotificationConfig {
    /// Row created on first access for a client.
    pub fn new_default(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            enabled: true,
            grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            last_notified: None,
        }
    }

    pub fn grace_period(&self) -> Duration {
        let secs = if self.grace_period_secs > 0 {
            self.grace_period_secs
        } else {
            DEFAULT_GRACE_PERIOD_SECS
        };
        Duration::from_secs(secs.unsigned_abs())
    }
}
