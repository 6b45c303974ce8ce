//! fleetpulse-core: pure types and decision logic for agent liveness tracking.
//! No async and no shared state: the daemon crate owns clocks, locks and tasks.

pub mod config;
pub mod liveness;
pub mod message;
pub mod types;

pub use config::{ConfigError, ServiceConfig};
pub use liveness::{
    ConnectOutcome, DisconnectOutcome, ExpiryOutcome, LivenessPhase, NotificationState,
    PendingToken,
};
pub use message::{NotificationKind, OutboundMessage};
pub use types::{ClientDescriptor, DEFAULT_GRACE_PERIOD_SECS, NotificationConfig, Report};
