//! Notification dispatch queue.
//!
//! The liveness monitor hands formatted messages to a bounded channel and
//! moves on; a separate worker drains the channel and sends each message in
//! its own detached task, so transport latency never reaches the caller.
//! Failures are logged and never retried.

use std::sync::Arc;

use fleetpulse_core::OutboundMessage;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::providers::Dispatcher;

/// Sending half of the dispatch channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<OutboundMessage>,
}

impl DispatchQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Create the channel and spawn its worker.
    pub fn spawn(
        capacity: usize,
        dispatcher: Arc<dyn Dispatcher>,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel(capacity);
        let worker = tokio::spawn(run_dispatch_worker(rx, dispatcher, cancel));
        (queue, worker)
    }

    /// Enqueue without waiting. A full or closed queue drops the message.
    ///
    /// Returns whether the message was accepted.
    pub fn enqueue(&self, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(
                    client_id = %msg.client,
                    kind = ?msg.kind,
                    "dispatch queue full, notification dropped"
                );
                false
            }
            Err(TrySendError::Closed(msg)) => {
                tracing::warn!(
                    client_id = %msg.client,
                    kind = ?msg.kind,
                    "dispatch worker stopped, notification dropped"
                );
                false
            }
        }
    }
}

/// Drain `rx` until the channel closes or `cancel` fires.
///
/// Each message is sent in a detached task. Messages still queued at
/// cancellation are abandoned.
pub async fn run_dispatch_worker(
    mut rx: mpsc::Receiver<OutboundMessage>,
    dispatcher: Arc<dyn Dispatcher>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else {
                    tracing::debug!("dispatch channel closed");
                    break;
                };
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    match dispatcher.send_message(&msg.text, &msg.title).await {
                        Ok(()) => {
                            tracing::info!(client_id = %msg.client, kind = ?msg.kind, "notification sent");
                        }
                        Err(e) => {
                            tracing::warn!(
                                client_id = %msg.client,
                                kind = ?msg.kind,
                                error = %e,
                                "failed to send notification"
                            );
                        }
                    }
                });
            }
            () = cancel.cancelled() => {
                tracing::debug!("dispatch worker cancelled");
                break;
            }
        }
    }
}
