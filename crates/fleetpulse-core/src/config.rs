//! Service configuration loaded from TOML.
//!
//! Every field has a default, so an empty or missing file is a valid
//! configuration. CLI flags override individual fields after loading.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::types::DEFAULT_GRACE_PERIOD_SECS;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:25774";
pub const DEFAULT_DATABASE: &str = "fleetpulse.db";
pub const DEFAULT_DISPATCH_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid listen address {0:?}")]
    InvalidListen(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Address of the agent WebSocket endpoint.
    pub listen: String,
    /// SQLite database holding clients and notification settings.
    pub database: PathBuf,
    /// Grace period written into newly created per-client notification rows.
    pub default_grace_period_secs: i64,
    pub dispatch_queue_capacity: usize,
    pub max_connections: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            database: PathBuf::from(DEFAULT_DATABASE),
            default_grace_period_secs: DEFAULT_GRACE_PERIOD_SECS,
            dispatch_queue_capacity: DEFAULT_DISPATCH_QUEUE_CAPACITY,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

impl ServiceConfig {
    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.listen.clone()))
    }
}
