//! Billing auto-renewal run when a client comes back online.

use async_trait::async_trait;
use chrono::Utc;
use fleetpulse_core::ClientDescriptor;

use crate::providers::RenewalChecker;
use crate::store::SqliteStore;

/// Advances an expired client's `expired_at` by whole billing cycles when
/// auto-renewal is on.
pub struct StoreRenewalChecker {
    store: SqliteStore,
}

impl StoreRenewalChecker {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RenewalChecker for StoreRenewalChecker {
    async fn check_and_renew(&self, client: &ClientDescriptor) {
        let Some(next) = client.renewal_due(Utc::now()) else {
            return;
        };
        let store = self.store.clone();
        let uuid = client.uuid.clone();
        let result =
            tokio::task::spawn_blocking(move || store.set_client_expiry(&uuid, next)).await;
        match result {
            Ok(Ok(())) => {
                tracing::info!(client_id = %client.uuid, expired_at = %next, "client auto-renewed");
            }
            Ok(Err(e)) => {
                tracing::warn!(client_id = %client.uuid, error = %e, "failed to persist renewal");
            }
            Err(e) => {
                tracing::warn!(client_id = %client.uuid, error = %e, "renewal task failed");
            }
        }
    }
}
