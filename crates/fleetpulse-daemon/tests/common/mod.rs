#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetpulse_core::{ClientDescriptor, NotificationConfig};
use fleetpulse_daemon::{
    ConfigProvider, DispatchError, DispatchQueue, Dispatcher, LivenessMonitor, NoopRenewal,
    StoreError,
};
use parking_lot::Mutex;
use tokio_util::sync::{CancellationToken, DropGuard};

/// In-memory settings: every registered client has notifications enabled
/// with its own grace period.
#[derive(Default)]
pub struct FakeConfig {
    global_off: AtomicBool,
    clients: Mutex<HashMap<String, ClientDescriptor>>,
    configs: Mutex<HashMap<String, NotificationConfig>>,
    pub notified: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeConfig {
    pub fn add_client(&self, id: &str, grace_secs: i64) {
        self.clients
            .lock()
            .insert(id.to_string(), ClientDescriptor::new(id, id));
        let mut conf = NotificationConfig::new_default(id);
        conf.grace_period_secs = grace_secs;
        self.configs.lock().insert(id.to_string(), conf);
    }

    pub fn notified_count(&self, id: &str) -> usize {
        self.notified.lock().iter().filter(|(c, _)| c == id).count()
    }
}

#[async_trait]
impl ConfigProvider for FakeConfig {
    async fn global_notifications_enabled(&self) -> Result<bool, StoreError> {
        Ok(!self.global_off.load(Ordering::SeqCst))
    }

    async fn get_client(&self, client_id: &str) -> Result<Option<ClientDescriptor>, StoreError> {
        Ok(self.clients.lock().get(client_id).cloned())
    }

    async fn get_or_create_client_config(
        &self,
        client_id: &str,
    ) -> Result<NotificationConfig, StoreError> {
        Ok(self
            .configs
            .lock()
            .entry(client_id.to_string())
            .or_insert_with(|| NotificationConfig::new_default(client_id))
            .clone())
    }

    async fn update_last_notified(
        &self,
        client_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.notified.lock().push((client_id.to_string(), at));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingDispatcher {
    pub fn texts(&self) -> Vec<String> {
        self.sent.lock().iter().map(|(text, _)| text.clone()).collect()
    }

    pub fn count(&self, text: &str) -> usize {
        self.sent.lock().iter().filter(|(t, _)| t == text).count()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn send_message(&self, text: &str, title: &str) -> Result<(), DispatchError> {
        self.sent.lock().push((text.to_string(), title.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub monitor: Arc<LivenessMonitor>,
    pub dispatcher: Arc<RecordingDispatcher>,
    _cancel: DropGuard,
}

impl Harness {
    pub fn new(config: Arc<dyn ConfigProvider>, queue_capacity: usize) -> Self {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let cancel = CancellationToken::new();
        let (queue, _worker) = DispatchQueue::spawn(queue_capacity, dispatcher.clone(), cancel.clone());
        let monitor = Arc::new(LivenessMonitor::new(config, Arc::new(NoopRenewal), queue));
        Self {
            monitor,
            dispatcher,
            _cancel: cancel.drop_guard(),
        }
    }
}

pub fn offline_text(id: &str) -> String {
    format!("🔴{id} is offline")
}

pub async fn advance_millis(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
