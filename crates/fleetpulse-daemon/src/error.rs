//! Error types for the daemon's external boundaries.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid timestamp in column {column}: {value}")]
    InvalidTimestamp { column: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport rejected message: {0}")]
    Rejected(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection already closed")]
    AlreadyClosed,

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}
