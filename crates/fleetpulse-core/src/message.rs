//! Notification text for liveness transitions.

use serde::{Deserialize, Serialize};

use crate::types::ClientDescriptor;

pub const OFFLINE_TITLE: &str = "Offline Notification";
pub const ONLINE_TITLE: &str = "Online Notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Offline,
    Online,
}

/// A formatted message ready for the outbound transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: NotificationKind,
    pub client: String,
    pub title: String,
    pub text: String,
}

impl OutboundMessage {
    pub fn offline(client: &ClientDescriptor) -> Self {
        Self {
            kind: NotificationKind::Offline,
            client: client.uuid.clone(),
            title: OFFLINE_TITLE.to_string(),
            text: format!("🔴{} is offline", client.display_name()),
        }
    }

    pub fn online(client: &ClientDescriptor) -> Self {
        Self {
            kind: NotificationKind::Online,
            client: client.uuid.clone(),
            title: ONLINE_TITLE.to_string(),
            text: format!("🟢{} is online", client.display_name()),
        }
    }
}
