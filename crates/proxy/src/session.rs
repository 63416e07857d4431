//! Transport sessions: one live MCP client connection per backend.
//!
//! The rmcp service loop owns the wire. Requests get monotonically increasing ids and responses are
//! matched back to their waiter through its pending-request map, so concurrent invocations on one
//! session interleave safely without any extra serialization here.

use crate::catalog::ToolDescriptor;
use crate::config::{BackendDescriptor, ServerMetadata, TransportConfig};
use crate::error::{ProxyError, Result};
use crate::schema::remote_error;
use async_trait::async_trait;
use parking_lot::RwLock;
use rmcp::{
    ClientHandler, RoleClient, ServiceExt,
    model::{CallToolRequestParams, CallToolResult, JsonObject},
    service::{Peer, RunningService, ServiceError},
    transport::{
        ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess,
        streamable_http_client::StreamableHttpClientTransportConfig,
    },
};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Lifecycle of a [`ToolSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Ready,
    /// The connection failed or dropped; invocations fail fast.
    ClosedError,
    /// Closed on purpose (shutdown).
    ClosedClean,
}

/// Request/response access to one backend.
///
/// Implementations must tolerate concurrent `invoke` calls.
#[async_trait]
pub trait ToolSession: Send + Sync {
    fn backend(&self) -> &str;

    fn state(&self) -> SessionState;

    /// Name/description/version reported by the backend during the handshake.
    fn server_info(&self) -> Option<ServerMetadata> {
        None
    }

    /// Whether the backend signalled a tool list change since the last `list_tools`.
    fn catalog_dirty(&self) -> bool {
        false
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    async fn invoke(
        &self,
        tool: &str,
        args: JsonObject,
        timeout: Duration,
    ) -> Result<CallToolResult>;

    /// Release the connection. Idempotent.
    async fn close(&self);
}

type McpClient = RunningService<RoleClient, CatalogWatcher>;

/// Client-side handler: records `notifications/tools/list_changed`.
#[derive(Debug, Clone)]
struct CatalogWatcher {
    backend: String,
    dirty: Arc<AtomicBool>,
}

impl ClientHandler for CatalogWatcher {
    fn on_tool_list_changed(
        &self,
        _context: rmcp::service::NotificationContext<RoleClient>,
    ) -> impl std::future::Future<Output = ()> + Send + '_ {
        let already_dirty = self.dirty.swap(true, Ordering::AcqRel);
        if !already_dirty {
            tracing::info!(backend = %self.backend, "Backend tool list changed");
        }
        std::future::ready(())
    }
}

/// A [`ToolSession`] over rmcp (stdio child process or Streamable HTTP).
pub struct TransportSession {
    backend: String,
    descriptor: BackendDescriptor,
    state: RwLock<SessionState>,
    peer: RwLock<Option<Peer<RoleClient>>>,
    client: Mutex<Option<McpClient>>,
    server_info: RwLock<Option<ServerMetadata>>,
    dirty: Arc<AtomicBool>,
}

impl std::fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSession")
            .field("backend", &self.backend)
            .field("transport", &self.descriptor.transport.kind())
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl TransportSession {
    /// An unconnected session in state `connecting`.
    #[must_use]
    pub fn new(backend: impl Into<String>, descriptor: BackendDescriptor) -> Self {
        Self {
            backend: backend.into(),
            descriptor,
            state: RwLock::new(SessionState::Connecting),
            peer: RwLock::new(None),
            client: Mutex::new(None),
            server_info: RwLock::new(None),
            dirty: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connect and complete the protocol handshake.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Connection`] if the backend cannot be spawned or reached, or the
    /// handshake fails.
    pub async fn open(backend: impl Into<String>, descriptor: BackendDescriptor) -> Result<Self> {
        let session = Self::new(backend, descriptor);
        session.connect().await?;
        Ok(session)
    }

    /// Perform the handshake on a `connecting` session.
    ///
    /// # Errors
    ///
    /// See [`TransportSession::open`]. The session is `closed_error` afterwards.
    pub async fn connect(&self) -> Result<()> {
        let handler = CatalogWatcher {
            backend: self.backend.clone(),
            dirty: self.dirty.clone(),
        };
        let client = match self.connect_client(handler).await {
            Ok(client) => client,
            Err(e) => {
                *self.state.write() = SessionState::ClosedError;
                return Err(e);
            }
        };

        if let Some(info) = client.peer_info() {
            tracing::info!(
                backend = %self.backend,
                server_name = %info.server_info.name,
                server_version = %info.server_info.version,
                "MCP backend connected"
            );
            *self.server_info.write() = Some(ServerMetadata {
                name: Some(info.server_info.name.clone()),
                description: info.instructions.clone(),
                version: Some(info.server_info.version.clone()),
            });
        } else {
            tracing::info!(backend = %self.backend, "MCP backend connected (peer_info unavailable)");
        }

        *self.peer.write() = Some(client.peer().clone());
        *self.client.lock().await = Some(client);
        *self.state.write() = SessionState::Ready;
        Ok(())
    }

    async fn connect_client(&self, handler: CatalogWatcher) -> Result<McpClient> {
        let name = &self.backend;
        match &self.descriptor.transport {
            TransportConfig::Stdio { command, args, env } => {
                let transport = TokioChildProcess::new(Command::new(command).configure(|cmd| {
                    cmd.args(args)
                        .envs(env)
                        .stderr(std::process::Stdio::inherit());
                }))
                .map_err(|e| ProxyError::Connection(format!("Failed to spawn '{name}': {e}")))?;

                handler
                    .serve(transport)
                    .await
                    .map_err(|e| ProxyError::Connection(format!("Failed to connect to '{name}': {e}")))
            }
            TransportConfig::StreamableHttp { url, headers } => {
                let mut header_map = reqwest::header::HeaderMap::new();
                for (key, value) in headers {
                    let header_name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                        .map_err(|e| {
                            ProxyError::Connection(format!("Invalid header name '{key}': {e}"))
                        })?;
                    let header_value = reqwest::header::HeaderValue::from_str(value)
                        .map_err(|e| {
                            ProxyError::Connection(format!("Invalid value for header '{key}': {e}"))
                        })?;
                    header_map.insert(header_name, header_value);
                }
                let http_client = reqwest::Client::builder()
                    .default_headers(header_map)
                    .build()
                    .map_err(|e| ProxyError::Connection(format!("Failed to build HTTP client: {e}")))?;

                let transport = StreamableHttpClientTransport::with_client(
                    http_client,
                    StreamableHttpClientTransportConfig::with_uri(url.as_str()),
                );

                handler
                    .serve(transport)
                    .await
                    .map_err(|e| ProxyError::Connection(format!("Failed to connect to '{name}' at {url}: {e}")))
            }
        }
    }

    fn ready_peer(&self) -> Result<Peer<RoleClient>> {
        match *self.state.read() {
            SessionState::Ready => {}
            SessionState::Connecting => {
                return Err(ProxyError::Protocol(format!(
                    "session for '{}' has not completed its handshake",
                    self.backend
                )));
            }
            SessionState::ClosedError => {
                return Err(ProxyError::Connection(format!(
                    "backend '{}' is unavailable (connection closed)",
                    self.backend
                )));
            }
            SessionState::ClosedClean => {
                return Err(ProxyError::Connection(format!(
                    "session for '{}' is closed",
                    self.backend
                )));
            }
        }
        self.peer.read().clone().ok_or_else(|| {
            ProxyError::Protocol(format!("session for '{}' has no peer", self.backend))
        })
    }

    fn mark_closed_error(&self, reason: &str) {
        let mut state = self.state.write();
        if *state == SessionState::Ready {
            tracing::warn!(backend = %self.backend, reason, "Marking MCP backend session as closed");
            *state = SessionState::ClosedError;
        }
    }

    /// Map an rmcp failure. `sent` tells whether the request reached the wire.
    fn classify(&self, err: ServiceError, sent: bool) -> ProxyError {
        match err {
            ServiceError::Timeout { timeout } => ProxyError::Timeout(timeout),
            ServiceError::McpError(data) => {
                remote_error(data.code.0, data.message.to_string(), data.data)
            }
            ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
                let reason = err.to_string();
                self.mark_closed_error(&reason);
                if sent {
                    ProxyError::ConnectionLost(format!(
                        "backend '{}' disconnected during the call: {reason}",
                        self.backend
                    ))
                } else {
                    ProxyError::Connection(format!(
                        "backend '{}' is unavailable: {reason}",
                        self.backend
                    ))
                }
            }
            other => ProxyError::Protocol(format!("Tool call failed: {other}")),
        }
    }
}

#[async_trait]
impl ToolSession for TransportSession {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn state(&self) -> SessionState {
        *self.state.read()
    }

    fn server_info(&self) -> Option<ServerMetadata> {
        self.server_info.read().clone()
    }

    fn catalog_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let peer = self.ready_peer()?;
        // Cleared before listing so a change signalled mid-listing is not lost.
        self.dirty.store(false, Ordering::Release);
        match peer.list_all_tools().await {
            Ok(tools) => {
                tracing::info!(backend = %self.backend, tools = tools.len(), "Discovered tools");
                Ok(tools.iter().map(ToolDescriptor::from).collect())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::Release);
                Err(match e {
                    ServiceError::TransportClosed | ServiceError::TransportSend(_) => {
                        self.classify(e, false)
                    }
                    other => ProxyError::Protocol(format!(
                        "Failed to list tools from '{}': {other}",
                        self.backend
                    )),
                })
            }
        }
    }

    async fn invoke(
        &self,
        tool: &str,
        args: JsonObject,
        timeout: Duration,
    ) -> Result<CallToolResult> {
        let peer = self.ready_peer()?;

        let request = rmcp::model::ClientRequest::CallToolRequest(rmcp::model::CallToolRequest {
            method: rmcp::model::CallToolRequestMethod,
            params: CallToolRequestParams {
                name: tool.to_string().into(),
                arguments: Some(args),
                meta: None,
                task: None,
            },
            extensions: rmcp::model::Extensions::default(),
        });

        let handle = peer
            .send_cancellable_request(
                request,
                rmcp::service::PeerRequestOptions {
                    timeout: Some(timeout),
                    meta: None,
                },
            )
            .await
            .map_err(|e| self.classify(e, false))?;

        let response = handle
            .await_response()
            .await
            .map_err(|e| self.classify(e, true))?;

        match response {
            rmcp::model::ServerResult::CallToolResult(r) => Ok(r),
            other => Err(ProxyError::Protocol(format!(
                "Unexpected response type for tools/call: {other:?}"
            ))),
        }
    }

    async fn close(&self) {
        let client = self.client.lock().await.take();
        self.peer.write().take();
        {
            let mut state = self.state.write();
            if *state != SessionState::ClosedError {
                *state = SessionState::ClosedClean;
            }
        }
        // Dropping the client kills a stdio child (kill_on_drop).
        if let Some(client) = client {
            tracing::info!(backend = %self.backend, "Closing MCP backend session");
            if let Err(e) = client.cancel().await {
                tracing::debug!(backend = %self.backend, error = %e, "Failed to stop MCP client");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use rmcp::model::Content;

    type Responder = fn(&str, &JsonObject) -> Result<CallToolResult>;

    /// In-memory session that records every invocation.
    pub(crate) struct SpySession {
        backend: String,
        tools: Vec<ToolDescriptor>,
        respond: Responder,
        pub(crate) calls: SyncMutex<Vec<(String, JsonObject)>>,
        state: SyncMutex<SessionState>,
        dirty: AtomicBool,
    }

    impl SpySession {
        pub(crate) fn new(backend: &str, tools: Vec<ToolDescriptor>) -> Self {
            Self::with_responder(backend, tools, echo_arguments)
        }

        pub(crate) fn with_responder(
            backend: &str,
            tools: Vec<ToolDescriptor>,
            respond: Responder,
        ) -> Self {
            Self {
                backend: backend.to_string(),
                tools,
                respond,
                calls: SyncMutex::new(Vec::new()),
                state: SyncMutex::new(SessionState::Ready),
                dirty: AtomicBool::new(false),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().len()
        }

        pub(crate) fn mark_dirty(&self) {
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn echo_arguments(_tool: &str, args: &JsonObject) -> Result<CallToolResult> {
        Ok(CallToolResult::success(vec![Content::text(
            serde_json::Value::Object(args.clone()).to_string(),
        )]))
    }

    #[async_trait]
    impl ToolSession for SpySession {
        fn backend(&self) -> &str {
            &self.backend
        }

        fn state(&self) -> SessionState {
            *self.state.lock()
        }

        fn catalog_dirty(&self) -> bool {
            self.dirty.load(Ordering::Acquire)
        }

        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            self.dirty.store(false, Ordering::Release);
            Ok(self.tools.clone())
        }

        async fn invoke(
            &self,
            tool: &str,
            args: JsonObject,
            _timeout: Duration,
        ) -> Result<CallToolResult> {
            let result = (self.respond)(tool, &args);
            self.calls.lock().push((tool.to_string(), args));
            result
        }

        async fn close(&self) {
            *self.state.lock() = SessionState::ClosedClean;
        }
    }
}
