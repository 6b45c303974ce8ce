//! Connection registry: client id → live connection handle and latest report.
//!
//! Pure state holder with no liveness policy. The two maps have independent
//! locks; reads share, writes exclude only the map they touch. Snapshots are
//! copies, so callers can iterate without racing concurrent mutation.

use std::collections::HashMap;
use std::sync::Arc;

use fleetpulse_core::Report;
use parking_lot::RwLock;

use crate::error::TransportError;

/// A live transport connection owned by a registry entry.
///
/// Clones must refer to the same underlying connection, so closing any clone
/// terminates the transport.
pub trait ConnectionHandle: Clone + Send + Sync + 'static {
    fn close(&self) -> Result<(), TransportError>;
}

pub struct ConnectionRegistry<H> {
    connections: RwLock<HashMap<String, H>>,
    reports: RwLock<HashMap<String, Arc<Report>>>,
}

impl<H: ConnectionHandle> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: ConnectionHandle> ConnectionRegistry<H> {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            reports: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the connection for `id`.
    ///
    /// A replaced handle is returned to the caller and is not closed here.
    pub fn register(&self, id: &str, handle: H) -> Option<H> {
        self.connections.write().insert(id.to_string(), handle)
    }

    /// Remove the entry for `id` and close its handle.
    ///
    /// Close errors are swallowed: the entry is gone either way. Returns
    /// whether an entry existed.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(handle) => {
                if let Err(e) = handle.close() {
                    tracing::debug!(client_id = %id, error = %e, "close on unregister failed");
                }
                true
            }
            None => false,
        }
    }

    /// Insert only if `id` has no connection. On conflict the handle is
    /// handed back untouched.
    pub fn try_register(&self, id: &str, handle: H) -> Result<(), H> {
        let mut connections = self.connections.write();
        if connections.contains_key(id) {
            return Err(handle);
        }
        connections.insert(id.to_string(), handle);
        Ok(())
    }

    /// Like [`unregister`](Self::unregister), but only when the current
    /// handle satisfies `matches`. Used by a connection task to remove its
    /// own entry without touching a successor's.
    pub fn unregister_if(&self, id: &str, matches: impl FnOnce(&H) -> bool) -> bool {
        let removed = {
            let mut connections = self.connections.write();
            match connections.get(id) {
                Some(current) if matches(current) => connections.remove(id),
                _ => None,
            }
        };
        match removed {
            Some(handle) => {
                if let Err(e) = handle.close() {
                    tracing::debug!(client_id = %id, error = %e, "close on unregister failed");
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<H> {
        self.connections.read().get(id).cloned()
    }

    pub fn is_connected(&self, id: &str) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Independent copy of the id → handle map.
    pub fn snapshot(&self) -> HashMap<String, H> {
        self.connections.read().clone()
    }

    /// Replace the latest report for `id`; the previous one is discarded.
    pub fn set_report(&self, id: &str, report: Report) {
        self.reports.write().insert(id.to_string(), Arc::new(report));
    }

    pub fn remove_report(&self, id: &str) -> bool {
        self.reports.write().remove(id).is_some()
    }

    pub fn report(&self, id: &str) -> Option<Arc<Report>> {
        self.reports.read().get(id).cloned()
    }

    /// Independent copy of the id → report map.
    pub fn snapshot_reports(&self) -> HashMap<String, Arc<Report>> {
        self.reports.read().clone()
    }
}
