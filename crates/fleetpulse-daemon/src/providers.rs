//! Narrow interfaces to the collaborators the liveness core depends on:
//! persistent notification settings, the outbound message transport, and the
//! billing renewal check.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{ClientDescriptor, NotificationConfig};

use crate::error::{DispatchError, StoreError};

/// Source of notification settings and client records.
#[async_trait]
pub trait ConfigProvider: Send + Sync {
    /// Global notification switch.
    async fn global_notifications_enabled(&self) -> Result<bool, StoreError>;

    /// `Ok(None)` when the id is unknown.
    async fn get_client(&self, client_id: &str) -> Result<Option<ClientDescriptor>, StoreError>;

    /// Idempotent get-or-create; safe under concurrent first access.
    async fn get_or_create_client_config(
        &self,
        client_id: &str,
    ) -> Result<NotificationConfig, StoreError>;

    async fn update_last_notified(
        &self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Outbound message transport (email, chat bot, webhook, ...).
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send_message(&self, text: &str, title: &str) -> Result<(), DispatchError>;
}

/// Billing auto-renewal evaluation, run when a client comes back online.
/// Failures are the implementation's to log.
#[async_trait]
pub trait RenewalChecker: Send + Sync {
    async fn check_and_renew(&self, client: &ClientDescriptor);
}

/// Dispatcher that writes messages to the log. Used when no outbound
/// transport is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send_message(&self, text: &str, title: &str) -> Result<(), DispatchError> {
        tracing::info!(title = %title, text = %text, "notification");
        Ok(())
    }
}

/// Renewal checker that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRenewal;

#[async_trait]
impl RenewalChecker for NoopRenewal {
    async fn check_and_renew(&self, _client: &ClientDescriptor) {}
}
