//! WebSocket transport for agents.
//!
//! Two routes:
//! - `/agent?client=<uuid>`: long-lived agent connection. Text frames are
//!   reports; connect and disconnect drive the liveness monitor.
//! - `/status`: one JSON frame describing connected clients, then close.
//!
//! At most one live connection per client. Registration plus `on_connect`,
//! and unregistration plus `on_disconnect`, each run under a per-client
//! gate, so the monitor sees one client's events in transport order.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use fleetpulse_core::config::DEFAULT_MAX_CONNECTIONS;
use fleetpulse_core::{LivenessPhase, Report};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;
use crate::monitor::LivenessMonitor;
use crate::providers::ConfigProvider;
use crate::registry::{ConnectionHandle, ConnectionRegistry};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;
type WsSource = SplitStream<WebSocketStream<TcpStream>>;

// ---------------------------------------------------------------------------
// Connection handle
// ---------------------------------------------------------------------------

/// Registry handle for one agent connection. Closing it stops the
/// connection task, which then sends a close frame.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    conn_id: u64,
    peer: SocketAddr,
    cancel: CancellationToken,
}

impl AgentConnection {
    fn new(conn_id: u64, peer: SocketAddr) -> Self {
        Self {
            conn_id,
            peer,
            cancel: CancellationToken::new(),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl ConnectionHandle for AgentConnection {
    fn close(&self) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::AlreadyClosed);
        }
        self.cancel.cancel();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Everything a connection task needs.
pub struct AgentHub {
    pub registry: Arc<ConnectionRegistry<AgentConnection>>,
    pub monitor: Arc<LivenessMonitor>,
    pub config: Arc<dyn ConfigProvider>,
    gates: DashMap<String, Arc<Mutex<()>>>,
    next_conn_id: AtomicU64,
}

impl AgentHub {
    pub fn new(monitor: Arc<LivenessMonitor>, config: Arc<dyn ConfigProvider>) -> Self {
        Self {
            registry: Arc::new(ConnectionRegistry::new()),
            monitor,
            config,
            gates: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    fn next_conn_id(&self) -> u64 {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Per-client gate held across a registry change and the matching
    /// monitor call.
    async fn client_gate(&self, client_id: &str) -> OwnedMutexGuard<()> {
        let gate = Arc::clone(
            self.gates
                .entry(client_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        gate.lock_owned().await
    }

    /// Close every registered connection.
    ///
    /// Iterates a snapshot so concurrent (un)registration cannot race the
    /// loop. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let snapshot = self.registry.snapshot();
        let mut closed = 0;
        for (client_id, handle) in snapshot {
            if self
                .registry
                .unregister_if(&client_id, |h| h.conn_id == handle.conn_id)
            {
                closed += 1;
            }
        }
        closed
    }

    pub fn status(&self) -> StatusSnapshot {
        let mut connected: Vec<String> = self.registry.snapshot().into_keys().collect();
        connected.sort();
        let phases = connected
            .iter()
            .filter_map(|id| self.monitor.phase(id).map(|p| (id.clone(), p)))
            .collect();
        let reports = self
            .registry
            .snapshot_reports()
            .into_iter()
            .map(|(id, report)| (id, Report::clone(&report)))
            .collect();
        StatusSnapshot {
            connected,
            phases,
            reports,
        }
    }
}

/// Body of the `/status` frame.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub connected: Vec<String>,
    pub phases: BTreeMap<String, LivenessPhase>,
    pub reports: BTreeMap<String, Report>,
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Agent { client_id: String },
    Status,
}

fn parse_route(uri: &http::Uri) -> Option<Route> {
    match uri.path() {
        "/status" => Some(Route::Status),
        "/agent" => {
            let client_id = uri.query()?.split('&').find_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                (key == "client" && !value.is_empty()).then(|| value.to_string())
            })?;
            Some(Route::Agent { client_id })
        }
        _ => None,
    }
}

fn not_found() -> ErrorResponse {
    let mut resp = ErrorResponse::new(Some("not found".into()));
    *resp.status_mut() = http::StatusCode::NOT_FOUND;
    resp
}

/// Decode an agent text frame. The frame must be a JSON object carrying a
/// numeric `version`; the whole object is kept as the payload.
fn parse_report(text: &str) -> Option<Report> {
    let payload: serde_json::Value = serde_json::from_str(text).ok()?;
    let version = u32::try_from(payload.get("version")?.as_u64()?).ok()?;
    Some(Report::new(version, payload, chrono::Utc::now()))
}

fn close_frame(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct WsServer {
    addr: SocketAddr,
    hub: Arc<AgentHub>,
    cancel: CancellationToken,
    max_connections: usize,
}

impl WsServer {
    pub fn new(addr: SocketAddr, hub: Arc<AgentHub>, cancel: CancellationToken) -> Self {
        Self {
            addr,
            hub,
            cancel,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max.max(1);
        self
    }

    pub fn hub(&self) -> &Arc<AgentHub> {
        &self.hub
    }

    /// Bind and serve until the cancellation token fires.
    pub async fn run(&self) -> Result<(), TransportError> {
        let (listener, _) = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind to the configured address and return the actual local address.
    pub async fn bind(&self) -> Result<(TcpListener, SocketAddr), TransportError> {
        let listener = TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, max_connections = self.max_connections, "ws server bound");
        Ok((listener, local_addr))
    }

    /// Accept loop on a pre-bound listener. On cancellation every registered
    /// agent connection is closed before returning.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        let semaphore = Arc::new(Semaphore::new(self.max_connections));

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::error!(error = %e, "ws: TCP accept failed");
                            continue;
                        }
                    };
                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        tracing::warn!(
                            peer = %peer,
                            max = self.max_connections,
                            "ws: connection limit reached, rejecting"
                        );
                        drop(stream);
                        continue;
                    };
                    tracing::debug!(peer = %peer, "ws: TCP connection accepted");
                    let hub = Arc::clone(&self.hub);
                    let shutdown = self.cancel.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        if let Err(e) = handle_connection(stream, peer, hub, shutdown).await {
                            tracing::debug!(peer = %peer, error = %e, "ws connection finished with error");
                        }
                    });
                }
                () = self.cancel.cancelled() => {
                    let closed = self.hub.close_all();
                    tracing::info!(closed, "ws server: cancellation requested, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Per-connection handlers
// ---------------------------------------------------------------------------

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<AgentHub>,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let mut route = None;
    let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
        match parse_route(req.uri()) {
            Some(r) => {
                route = Some(r);
                Ok(resp)
            }
            None => {
                tracing::debug!(peer = %peer, path = %req.uri(), "ws: unknown route");
                Err(not_found())
            }
        }
    })
    .await?;

    match route {
        Some(Route::Agent { client_id }) => handle_agent(ws, peer, client_id, hub, shutdown).await,
        Some(Route::Status) => handle_status(ws, &hub).await,
        None => Ok(()),
    }
}

async fn handle_status(
    mut ws: WebSocketStream<TcpStream>,
    hub: &AgentHub,
) -> Result<(), TransportError> {
    let body = serde_json::to_string(&hub.status())?;
    ws.send(Message::Text(body)).await?;
    ws.close(None).await?;
    Ok(())
}

async fn handle_agent(
    ws: WebSocketStream<TcpStream>,
    peer: SocketAddr,
    client_id: String,
    hub: Arc<AgentHub>,
    shutdown: CancellationToken,
) -> Result<(), TransportError> {
    let (mut ws_tx, mut ws_rx) = ws.split();

    match hub.config.get_client(&client_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::info!(client_id = %client_id, peer = %peer, "ws: rejected unknown client");
            ws_tx.send(close_frame(CloseCode::Policy, "unknown client")).await?;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(client_id = %client_id, error = %e, "ws: client lookup failed");
            ws_tx.send(close_frame(CloseCode::Error, "store unavailable")).await?;
            return Ok(());
        }
    }

    let conn = AgentConnection::new(hub.next_conn_id(), peer);
    let registered = {
        let _gate = hub.client_gate(&client_id).await;
        let registered = hub.registry.try_register(&client_id, conn.clone()).is_ok();
        if registered {
            tracing::info!(client_id = %client_id, peer = %peer, conn_id = conn.conn_id, "agent connected");
            hub.monitor.on_connect(&client_id).await;
        }
        registered
    };
    if !registered {
        tracing::warn!(client_id = %client_id, peer = %peer, "ws: client already connected");
        let err = serde_json::json!({ "error": "client already connected" });
        ws_tx.send(Message::Text(err.to_string())).await?;
        ws_tx.send(close_frame(CloseCode::Policy, "already connected")).await?;
        return Ok(());
    }

    let result = agent_loop(&mut ws_tx, &mut ws_rx, &client_id, &conn, &hub, &shutdown).await;

    // Held until on_disconnect returns; a reconnect's registration waits on it.
    let _gate = hub.client_gate(&client_id).await;
    let removed = hub
        .registry
        .unregister_if(&client_id, |h| h.conn_id == conn.conn_id);
    if shutdown.is_cancelled() {
        tracing::debug!(client_id = %client_id, "agent closed by shutdown");
    } else if !removed && hub.registry.is_connected(&client_id) {
        // Evicted, and a newer connection already went through on_connect.
        tracing::debug!(client_id = %client_id, conn_id = conn.conn_id, "disconnect superseded by newer connection");
    } else {
        tracing::info!(client_id = %client_id, conn_id = conn.conn_id, "agent disconnected");
        hub.monitor.on_disconnect(&client_id).await;
    }
    result
}

async fn agent_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsSource,
    client_id: &str,
    conn: &AgentConnection,
    hub: &AgentHub,
    shutdown: &CancellationToken,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match parse_report(&text) {
                        Some(report) => hub.registry.set_report(client_id, report),
                        None => tracing::debug!(client_id = %client_id, "ignoring unparsable report frame"),
                    },
                    Some(Ok(Message::Ping(data))) => ws_tx.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                }
            }
            () = conn.cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
            () = shutdown.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                return Ok(());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchQueue;
    use crate::error::{DispatchError, StoreError};
    use crate::providers::{Dispatcher, LogDispatcher, NoopRenewal};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use fleetpulse_core::{ClientDescriptor, NotificationConfig};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio_tungstenite::MaybeTlsStream;

    type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

    struct TestServer {
        addr: SocketAddr,
        hub: Arc<AgentHub>,
        cancel: CancellationToken,
        handle: Option<tokio::task::JoinHandle<Result<(), TransportError>>>,
    }

    fn test_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_notifications_enabled(true).unwrap();
        store.upsert_client(&ClientDescriptor::new("u-1", "web-01")).unwrap();
        store.upsert_client(&ClientDescriptor::new("u-2", "web-02")).unwrap();
        store
    }

    async fn start_test_server(max_connections: Option<usize>) -> TestServer {
        start_server_with(Arc::new(test_store()), Arc::new(LogDispatcher), max_connections).await
    }

    async fn start_server_with(
        config: Arc<dyn ConfigProvider>,
        dispatcher: Arc<dyn Dispatcher>,
        max_connections: Option<usize>,
    ) -> TestServer {
        let cancel = CancellationToken::new();
        let (queue, _worker) = DispatchQueue::spawn(16, dispatcher, cancel.child_token());
        let monitor = Arc::new(LivenessMonitor::new(
            Arc::clone(&config),
            Arc::new(NoopRenewal),
            queue,
        ));
        let hub = Arc::new(AgentHub::new(monitor, config));

        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = WsServer::new(addr, Arc::clone(&hub), cancel.clone());
        if let Some(max) = max_connections {
            server = server.with_max_connections(max);
        }
        let (listener, local_addr) = server.bind().await.unwrap();
        let handle = tokio::spawn(async move { server.serve(listener).await });
        TestServer {
            addr: local_addr,
            hub,
            cancel,
            handle: Some(handle),
        }
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("ws://127.0.0.1:{}{path}", self.addr.port())
        }

        async fn connect_agent(&self, client_id: &str) -> ClientWs {
            let url = self.url(&format!("/agent?client={client_id}"));
            let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
            ws
        }

        async fn status(&self) -> serde_json::Value {
            let (mut ws, _) = tokio_tungstenite::connect_async(self.url("/status"))
                .await
                .unwrap();
            match next_frame(&mut ws).await {
                Some(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
                other => panic!("expected status frame, got {other:?}"),
            }
        }

        /// Poll until `cond` holds or two seconds pass.
        async fn wait_for(&self, cond: impl Fn(&AgentHub) -> bool) -> bool {
            for _ in 0..100 {
                if cond(&self.hub) {
                    return true;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            false
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.cancel.cancel();
        }
    }

    async fn next_frame(ws: &mut ClientWs) -> Option<Message> {
        tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for frame")
            .and_then(Result::ok)
    }

    #[test]
    fn parse_route_variants() {
        let uri: http::Uri = "/agent?client=u-1".parse().unwrap();
        assert_eq!(
            parse_route(&uri),
            Some(Route::Agent {
                client_id: "u-1".into()
            })
        );
        let uri: http::Uri = "/agent?x=1&client=u-2".parse().unwrap();
        assert_eq!(
            parse_route(&uri),
            Some(Route::Agent {
                client_id: "u-2".into()
            })
        );
        let uri: http::Uri = "/status".parse().unwrap();
        assert_eq!(parse_route(&uri), Some(Route::Status));

        for bad in ["/agent", "/agent?client=", "/", "/other?client=u-1"] {
            let uri: http::Uri = bad.parse().unwrap();
            assert_eq!(parse_route(&uri), None, "{bad}");
        }
    }

    #[test]
    fn parse_report_requires_version() {
        let report = parse_report(r#"{"version":2,"cpu":0.5}"#).unwrap();
        assert_eq!(report.version, 2);
        assert_eq!(report.payload["cpu"], 0.5);

        assert!(parse_report(r#"{"cpu":0.5}"#).is_none());
        assert!(parse_report("not json").is_none());
        assert!(parse_report(r#"{"version":-1}"#).is_none());
    }

    #[test]
    fn close_is_idempotent_per_handle() {
        let conn = AgentConnection::new(1, "127.0.0.1:1".parse().unwrap());
        assert!(conn.close().is_ok());
        assert!(matches!(conn.close(), Err(TransportError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn agent_report_visible_in_status() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-1").await;
        ws.send(Message::Text(r#"{"version":3,"load":[0.1,0.2]}"#.into()))
            .await
            .unwrap();

        assert!(server.wait_for(|hub| hub.registry.report("u-1").is_some()).await);

        let status = server.status().await;
        assert_eq!(status["connected"], serde_json::json!(["u-1"]));
        assert_eq!(status["reports"]["u-1"]["version"], 3);
        assert_eq!(status["phases"]["u-1"]["phase"], "online");
    }

    #[tokio::test]
    async fn unparsable_frame_is_ignored() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-1").await;
        ws.send(Message::Text("garbage".into())).await.unwrap();
        ws.send(Message::Text(r#"{"version":1}"#.into())).await.unwrap();

        assert!(server.wait_for(|hub| hub.registry.report("u-1").is_some()).await);
        assert!(server.hub.registry.is_connected("u-1"));
    }

    #[tokio::test]
    async fn unknown_route_rejected_at_handshake() {
        let server = start_test_server(None).await;
        let result = tokio_tungstenite::connect_async(server.url("/nope")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn unknown_client_closed_with_policy_code() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("nobody").await;

        match next_frame(&mut ws).await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, CloseCode::Policy),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(server.hub.registry.connected_count(), 0);
        assert!(server.hub.monitor.phase("nobody").is_none());
    }

    #[tokio::test]
    async fn duplicate_connection_rejected() {
        let server = start_test_server(None).await;
        let _first = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);

        let mut second = server.connect_agent("u-1").await;
        match next_frame(&mut second).await {
            Some(Message::Text(text)) => assert!(text.contains("already connected")),
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(matches!(next_frame(&mut second).await, Some(Message::Close(_)) | None));

        assert!(server.hub.registry.is_connected("u-1"));
        assert_eq!(server.hub.registry.connected_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_starts_grace_period() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);

        ws.close(None).await.unwrap();

        assert!(
            server
                .wait_for(|hub| matches!(
                    hub.monitor.phase("u-1"),
                    Some(LivenessPhase::PendingOffline { .. })
                ))
                .await
        );
        assert!(!server.hub.registry.is_connected("u-1"));
    }

    /// Store whose third `get_client` call stalls. For one connect then
    /// disconnect, the third lookup is the one made while resolving the
    /// disconnect.
    struct SlowThirdLookup {
        inner: SqliteStore,
        lookups: AtomicUsize,
    }

    #[async_trait]
    impl ConfigProvider for SlowThirdLookup {
        async fn global_notifications_enabled(&self) -> Result<bool, StoreError> {
            self.inner.global_notifications_enabled().await
        }

        async fn get_client(
            &self,
            client_id: &str,
        ) -> Result<Option<ClientDescriptor>, StoreError> {
            if self.lookups.fetch_add(1, Ordering::SeqCst) == 2 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            ConfigProvider::get_client(&self.inner, client_id).await
        }

        async fn get_or_create_client_config(
            &self,
            client_id: &str,
        ) -> Result<NotificationConfig, StoreError> {
            self.inner.get_or_create_client_config(client_id).await
        }

        async fn update_last_notified(
            &self,
            client_id: &str,
            at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.inner.update_last_notified(client_id, at).await
        }
    }

    #[derive(Default)]
    struct Recording {
        sent: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Dispatcher for Recording {
        async fn send_message(&self, text: &str, _title: &str) -> Result<(), DispatchError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn slow_disconnect_is_ordered_before_reconnect() {
        let store = test_store();
        store.set_client_notification("u-1", Some(true), Some(1)).unwrap();
        let config = Arc::new(SlowThirdLookup {
            inner: store,
            lookups: AtomicUsize::new(0),
        });
        let recording = Arc::new(Recording::default());
        let server = start_server_with(config, recording.clone(), None).await;

        let mut ws = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);
        ws.close(None).await.unwrap();
        assert!(server.wait_for(|hub| !hub.registry.is_connected("u-1")).await);

        // Reconnect while the disconnect is still resolving its settings.
        let _ws = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);

        // Past the one-second grace period.
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert!(server.hub.registry.is_connected("u-1"));
        assert_eq!(server.hub.monitor.phase("u-1"), Some(LivenessPhase::Online));
        assert!(recording.sent.lock().is_empty(), "sent {:?}", recording.sent.lock());
    }

    #[tokio::test]
    async fn eviction_closes_agent_and_disconnects() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-2").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-2")).await);

        assert!(server.hub.registry.unregister("u-2"));

        assert!(matches!(next_frame(&mut ws).await, Some(Message::Close(_)) | None));
        assert!(
            server
                .wait_for(|hub| matches!(
                    hub.monitor.phase("u-2"),
                    Some(LivenessPhase::PendingOffline { .. })
                ))
                .await
        );
    }

    #[tokio::test]
    async fn reconnect_after_disconnect_is_accepted() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);
        ws.close(None).await.unwrap();
        assert!(server.wait_for(|hub| !hub.registry.is_connected("u-1")).await);

        let _ws = server.connect_agent("u-1").await;

        assert!(
            server
                .wait_for(|hub| hub.registry.is_connected("u-1")
                    && hub.monitor.phase("u-1") == Some(LivenessPhase::Online))
                .await
        );
    }

    #[tokio::test]
    async fn shutdown_closes_agents_without_disconnect() {
        let server = start_test_server(None).await;
        let mut ws = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);

        server.cancel.cancel();

        assert!(matches!(next_frame(&mut ws).await, Some(Message::Close(_)) | None));
        assert!(server.wait_for(|hub| hub.registry.connected_count() == 0).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.hub.monitor.phase("u-1"), Some(LivenessPhase::Online));
    }

    #[tokio::test]
    async fn cancel_token_stops_server() {
        let mut server = start_test_server(None).await;
        server.cancel.cancel();
        let handle = server.handle.take().unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("server should stop")
            .expect("server task should not panic");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn connection_limit_enforced() {
        let server = start_test_server(Some(1)).await;
        let _first = server.connect_agent("u-1").await;
        assert!(server.wait_for(|hub| hub.registry.is_connected("u-1")).await);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            tokio_tungstenite::connect_async(server.url("/agent?client=u-2")),
        )
        .await;

        match result {
            Ok(Ok((mut ws, _))) => {
                assert!(matches!(next_frame(&mut ws).await, None | Some(Message::Close(_))));
            }
            Ok(Err(_)) | Err(_) => {}
        }
        assert!(!server.hub.registry.is_connected("u-2"));
    }
}
