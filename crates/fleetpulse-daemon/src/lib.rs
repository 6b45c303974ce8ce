pub mod dispatch;
pub mod error;
pub mod monitor;
pub mod providers;
pub mod registry;
pub mod renewal;
pub mod store;
pub mod ws_server;

pub use dispatch::DispatchQueue;
pub use error::{DispatchError, StoreError, TransportError};
pub use monitor::LivenessMonitor;
pub use providers::{ConfigProvider, Dispatcher, LogDispatcher, NoopRenewal, RenewalChecker};
pub use registry::{ConnectionHandle, ConnectionRegistry};
pub use renewal::StoreRenewalChecker;
pub use store::SqliteStore;
pub use ws_server::{AgentConnection, AgentHub, StatusSnapshot, WsServer};
