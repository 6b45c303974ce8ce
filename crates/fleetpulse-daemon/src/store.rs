//! SQLite persistence for clients and notification settings.
//!
//! The synchronous API is used by the admin commands; the async
//! [`ConfigProvider`] impl runs the same queries on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{ClientDescriptor, DEFAULT_GRACE_PERIOD_SECS, NotificationConfig};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::StoreError;
use crate::providers::ConfigProvider;

const NOTIFICATION_ENABLED_KEY: &str = "notification_enabled";

/// SQLite-backed store. Cheap to clone; clones share one connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    default_grace_period_secs: i64,
}

impl SqliteStore {
    /// Open (or create) a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open an in-memory database. Useful for testing.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            default_grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Grace period written into newly created notification rows.
    pub fn with_default_grace_period(mut self, secs: i64) -> Self {
        self.default_grace_period_secs = secs;
        self
    }

    fn migrate(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS settings (
                key    TEXT PRIMARY KEY,
                value  TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS clients (
                uuid               TEXT PRIMARY KEY,
                name               TEXT NOT NULL DEFAULT '',
                auto_renewal       INTEGER NOT NULL DEFAULT 0,
                billing_cycle_days INTEGER NOT NULL DEFAULT 0,
                expired_at         TEXT,
                updated_at         TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS offline_notifications (
                client        TEXT PRIMARY KEY,
                enable        INTEGER NOT NULL DEFAULT 1,
                grace_period  INTEGER NOT NULL DEFAULT 300,
                last_notified TEXT
            );",
        )?;
        Ok(())
    }

    // ─── Settings ────────────────────────────────────────────────────

    pub fn notifications_enabled(&self) -> Result<bool, StoreError> {
        read_notifications_enabled(&self.conn.lock())
    }

    pub fn set_notifications_enabled(&self, enabled: bool) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![NOTIFICATION_ENABLED_KEY, if enabled { "1" } else { "0" }],
        )?;
        Ok(())
    }

    // ─── Clients ─────────────────────────────────────────────────────

    pub fn upsert_client(&self, client: &ClientDescriptor) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT INTO clients (uuid, name, auto_renewal, billing_cycle_days, expired_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(uuid) DO UPDATE SET
                name = excluded.name,
                auto_renewal = excluded.auto_renewal,
                billing_cycle_days = excluded.billing_cycle_days,
                expired_at = excluded.expired_at,
                updated_at = excluded.updated_at",
            params![
                client.uuid,
                client.name,
                client.auto_renewal,
                client.billing_cycle_days,
                client.expired_at.map(|dt| dt.to_rfc3339()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete a client and its notification row. Returns whether it existed.
    pub fn remove_client(&self, uuid: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM offline_notifications WHERE client = ?1",
            params![uuid],
        )?;
        let removed = conn.execute("DELETE FROM clients WHERE uuid = ?1", params![uuid])?;
        Ok(removed > 0)
    }

    pub fn get_client(&self, uuid: &str) -> Result<Option<ClientDescriptor>, StoreError> {
        read_client(&self.conn.lock(), uuid)
    }

    pub fn list_clients(&self) -> Result<Vec<ClientDescriptor>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT uuid, name, auto_renewal, billing_cycle_days, expired_at
             FROM clients ORDER BY name, uuid",
        )?;
        let rows = stmt.query_map([], client_row)?;
        let mut clients = Vec::new();
        for row in rows {
            clients.push(row?.into_descriptor()?);
        }
        Ok(clients)
    }

    pub fn set_client_expiry(&self, uuid: &str, expired_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE clients SET expired_at = ?2, updated_at = ?3 WHERE uuid = ?1",
            params![uuid, expired_at.to_rfc3339(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    // ─── Notification config ─────────────────────────────────────────

    /// Get-or-create the notification row for `uuid`.
    pub fn client_config(&self, uuid: &str) -> Result<NotificationConfig, StoreError> {
        read_or_create_config(&self.conn.lock(), uuid, self.default_grace_period_secs)
    }

    /// Update the notification row, creating it first if needed. `None`
    /// leaves a field unchanged.
    pub fn set_client_notification(
        &self,
        uuid: &str,
        enabled: Option<bool>,
        grace_period_secs: Option<i64>,
    ) -> Result<NotificationConfig, StoreError> {
        let conn = self.conn.lock();
        read_or_create_config(&conn, uuid, self.default_grace_period_secs)?;
        if let Some(enabled) = enabled {
            conn.execute(
                "UPDATE offline_notifications SET enable = ?2 WHERE client = ?1",
                params![uuid, enabled],
            )?;
        }
        if let Some(grace) = grace_period_secs {
            conn.execute(
                "UPDATE offline_notifications SET grace_period = ?2 WHERE client = ?1",
                params![uuid, grace],
            )?;
        }
        read_or_create_config(&conn, uuid, self.default_grace_period_secs)
    }

    pub fn set_last_notified(&self, uuid: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE offline_notifications SET last_notified = ?2 WHERE client = ?1",
            params![uuid, at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }
}

#[async_trait]
impl ConfigProvider for SqliteStore {
    async fn global_notifications_enabled(&self) -> Result<bool, StoreError> {
        self.blocking(|store| store.notifications_enabled()).await
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientDescriptor>, StoreError> {
        let id = client_id.to_string();
        self.blocking(move |store| store.get_client(&id)).await
    }

    async fn get_or_create_client_config(
        &self,
        client_id: &str,
    ) -> Result<NotificationConfig, StoreError> {
        let id = client_id.to_string();
        self.blocking(move |store| store.client_config(&id)).await
    }

    async fn update_last_notified(
        &self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let id = client_id.to_string();
        self.blocking(move |store| store.set_last_notified(&id, at)).await
    }
}

// ─── Row helpers ─────────────────────────────────────────────────────

struct ClientRow {
    uuid: String,
    name: String,
    auto_renewal: bool,
    billing_cycle_days: u32,
    expired_at: Option<String>,
}

impl ClientRow {
    fn into_descriptor(self) -> Result<ClientDescriptor, StoreError> {
        Ok(ClientDescriptor {
            expired_at: parse_ts("expired_at", self.expired_at)?,
            uuid: self.uuid,
            name: self.name,
            auto_renewal: self.auto_renewal,
            billing_cycle_days: self.billing_cycle_days,
        })
    }
}

fn client_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ClientRow> {
    Ok(ClientRow {
        uuid: row.get(0)?,
        name: row.get(1)?,
        auto_renewal: row.get(2)?,
        billing_cycle_days: row.get(3)?,
        expired_at: row.get(4)?,
    })
}

fn read_client(conn: &Connection, uuid: &str) -> Result<Option<ClientDescriptor>, StoreError> {
    let row = conn
        .query_row(
            "SELECT uuid, name, auto_renewal, billing_cycle_days, expired_at
             FROM clients WHERE uuid = ?1",
            params![uuid],
            client_row,
        )
        .optional()?;
    row.map(ClientRow::into_descriptor).transpose()
}

fn read_notifications_enabled(conn: &Connection) -> Result<bool, StoreError> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![NOTIFICATION_ENABLED_KEY],
            |row| row.get(0),
        )
        .optional()?;
    Ok(matches!(value.as_deref(), Some("1" | "true")))
}

/// `INSERT OR IGNORE` + `SELECT` under one connection lock: concurrent first
/// accesses all observe the same row.
fn read_or_create_config(
    conn: &Connection,
    uuid: &str,
    default_grace: i64,
) -> Result<NotificationConfig, StoreError> {
    conn.execute(
        "INSERT OR IGNORE INTO offline_notifications (client, enable, grace_period)
         VALUES (?1, 1, ?2)",
        params![uuid, default_grace],
    )?;
    let (enabled, grace_period_secs, last_notified): (bool, i64, Option<String>) = conn
        .query_row(
            "SELECT enable, grace_period, last_notified
             FROM offline_notifications WHERE client = ?1",
            params![uuid],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
    Ok(NotificationConfig {
        client: uuid.to_string(),
        enabled,
        grace_period_secs,
        last_notified: parse_ts("last_notified", last_notified)?,
    })
}

fn parse_ts(column: &'static str, value: Option<String>) -> Result<Option<DateTime<Utc>>, StoreError> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| StoreError::InvalidTimestamp { column, value: s })
        })
        .transpose()
}
