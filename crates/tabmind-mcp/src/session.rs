//! Per-server MCP session.
//!
//! One [`McpSession`] owns the bidirectional conversation with a
//! single server, hiding which transport the connect-time negotiation
//! landed on. Reconnect policy lives in the connection manager, not
//! here; the session only reports its state truthfully.

use crate::error::{McpError, McpResult};
use crate::protocol::{
    CallToolParams, InitializeParams, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    ListToolsResult, McpTool, ToolCallResult,
};
use crate::server::{ConnectionState, ServerStatus};
use crate::sse::{LegacySseTransport, SseConfig};
use crate::streamable::{StreamableConfig, StreamableTransport};
use crate::transport::{ActiveTransport, Transport, TransportEvents, TransportKind};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session configuration for one server.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Server id, for logging and routing.
    pub server_id: String,
    /// Human-readable server name.
    pub server_name: String,
    /// MCP endpoint URL.
    pub url: String,
    /// Bearer token, when the server requires authentication.
    pub bearer_token: Option<String>,
    /// Timeout for individual requests (including tool calls).
    pub request_timeout: std::time::Duration,
    /// Timeout for transport establishment.
    pub connect_timeout: std::time::Duration,
}

impl SessionConfig {
    /// Create a config with default timeouts.
    pub fn new(
        server_id: impl Into<String>,
        server_name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            server_id: server_id.into(),
            server_name: server_name.into(),
            url: url.into(),
            bearer_token: None,
            request_timeout: std::time::Duration::from_secs(60),
            connect_timeout: std::time::Duration::from_secs(10),
        }
    }

    /// Attach a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }
}

/// Callbacks supplied at construction.
///
/// Both fire from the transport's read loop, at arbitrary times
/// relative to calls the owner makes.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    /// Connection state changed.
    pub on_status_change: Option<Arc<dyn Fn(ConnectionState) + Send + Sync>>,
    /// The server pushed a notification.
    pub on_message: Option<Arc<dyn Fn(JsonRpcNotification) + Send + Sync>>,
}

impl std::fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

/// State shared with transport callbacks.
struct SessionShared {
    state_tx: watch::Sender<ConnectionState>,
    tools: std::sync::RwLock<Vec<McpTool>>,
    last_error: std::sync::RwLock<Option<String>>,
    callbacks: SessionCallbacks,
}

impl SessionShared {
    /// Transition to a new state, notifying the owner on change.
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            if let Some(ref cb) = self.callbacks.on_status_change {
                cb(state);
            }
        }
    }

    /// Record a failure and move to `Error` unless the session was
    /// already explicitly disconnected.
    fn fail(&self, reason: String) {
        if let Ok(mut guard) = self.last_error.write() {
            *guard = Some(reason);
        }
        let changed = self.state_tx.send_if_modified(|current| match current {
            ConnectionState::Disconnected => false,
            _ => {
                *current = ConnectionState::Error;
                true
            }
        });
        if changed {
            if let Some(ref cb) = self.callbacks.on_status_change {
                cb(ConnectionState::Error);
            }
        }
    }
}

/// A live (or establishable) connection to one MCP server.
pub struct McpSession {
    config: SessionConfig,
    shared: Arc<SessionShared>,
    state_rx: watch::Receiver<ConnectionState>,
    transport: tokio::sync::RwLock<Option<Arc<dyn Transport>>>,
    kind: std::sync::RwLock<Option<TransportKind>>,
    server_info: std::sync::RwLock<Option<InitializeResult>>,
    initialized: AtomicBool,
    next_id: AtomicU64,
}

impl McpSession {
    /// Create a session. No I/O happens until [`McpSession::connect`].
    pub fn new(config: SessionConfig, callbacks: SessionCallbacks) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            shared: Arc::new(SessionShared {
                state_tx,
                tools: std::sync::RwLock::new(Vec::new()),
                last_error: std::sync::RwLock::new(None),
                callbacks,
            }),
            state_rx,
            transport: tokio::sync::RwLock::new(None),
            kind: std::sync::RwLock::new(None),
            server_info: std::sync::RwLock::new(None),
            initialized: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        }
    }

    /// Server id this session belongs to.
    pub fn server_id(&self) -> &str {
        &self.config.server_id
    }

    /// Allocate the next request id.
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Establish a transport to the server.
    ///
    /// Streamable HTTP is attempted first; a transport-mismatch
    /// answer falls back to the legacy HTTP+SSE pair. Auth rejections
    /// and network failures never fall back; retrying a rejected
    /// token on a second transport cannot succeed.
    pub async fn connect(&self) -> McpResult<()> {
        {
            let state = *self.state_rx.borrow();
            if matches!(state, ConnectionState::Connecting | ConnectionState::Connected) {
                return Err(McpError::protocol("connect called while session active"));
            }
        }

        self.shared.set_state(ConnectionState::Connecting);

        let events = self.transport_events();

        let streamable = StreamableTransport::new(
            StreamableConfig {
                url: self.config.url.clone(),
                auth_token: self.config.bearer_token.clone(),
                request_timeout: self.config.request_timeout,
            },
            events.clone(),
        )?;

        let active = match streamable.probe(self.next_request_id()).await {
            Ok(()) => ActiveTransport::Streamable(streamable),
            Err(McpError::TransportMismatch(reason)) => {
                debug!(
                    server = %self.config.server_id,
                    reason = %reason,
                    "Streamable transport rejected, falling back to SSE"
                );
                let sse = LegacySseTransport::connect(
                    SseConfig {
                        url: self.config.url.clone(),
                        auth_token: self.config.bearer_token.clone(),
                        request_timeout: self.config.request_timeout,
                        connect_timeout: self.config.connect_timeout,
                    },
                    events,
                )
                .await
                .map_err(|e| self.fail_connect(e))?;
                ActiveTransport::LegacySse(sse)
            }
            Err(e) => return Err(self.fail_connect(e)),
        };

        let kind = active.kind();
        if let Ok(mut guard) = self.kind.write() {
            *guard = Some(kind);
        }
        *self.transport.write().await = Some(Arc::new(active));
        self.shared.set_state(ConnectionState::Connected);

        info!(
            server = %self.config.server_id,
            transport = ?kind,
            "Connected to MCP server"
        );
        Ok(())
    }

    /// Record a connect failure and hand the error back.
    fn fail_connect(&self, e: McpError) -> McpError {
        self.shared.fail(e.to_string());
        e
    }

    /// Build the callbacks handed to transports.
    fn transport_events(&self) -> TransportEvents {
        let shared = self.shared.clone();
        let on_message = self.shared.callbacks.on_message.clone();
        TransportEvents {
            on_disconnect: Some(Arc::new(move |reason: String| {
                shared.fail(reason);
            })),
            on_notification: on_message,
        }
    }

    /// Perform the MCP initialize handshake.
    ///
    /// Must be called after [`McpSession::connect`] and before any
    /// tool operation.
    pub async fn initialize(&self) -> McpResult<InitializeResult> {
        let transport = self.current_transport().await.ok_or_else(|| {
            McpError::protocol("initialize called before connect")
        })?;

        let params = InitializeParams::default();
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "initialize",
            Some(serde_json::to_value(&params)?),
        );

        let response = transport.request(request).await?;

        if let Some(error) = response.error {
            return Err(McpError::InitializationFailed(error.message));
        }

        let result: InitializeResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing initialize result"))?,
        )
        .map_err(|e| McpError::protocol(format!("Malformed initialize result: {e}")))?;

        debug!(
            server = %self.config.server_id,
            protocol_version = %result.protocol_version,
            remote = %result.server_info.name,
            "MCP handshake complete"
        );

        transport
            .notify(JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        if let Ok(mut guard) = self.server_info.write() {
            *guard = Some(result.clone());
        }
        self.initialized.store(true, Ordering::SeqCst);

        Ok(result)
    }

    /// Fetch the server's advertised tool catalog.
    pub async fn list_tools(&self) -> McpResult<Vec<McpTool>> {
        self.require_initialized()?;
        let transport = self
            .current_transport()
            .await
            .ok_or(McpError::NotConnected)?;

        let request = JsonRpcRequest::new(self.next_request_id(), "tools/list", None);
        let response = transport.request(request).await?;

        if let Some(error) = response.error {
            warn!(
                server = %self.config.server_id,
                code = error.code,
                message = %error.message,
                "Failed to list tools"
            );
            return Ok(Vec::new());
        }

        let result: ListToolsResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing tools/list result"))?,
        )
        .map_err(|e| McpError::protocol(format!("Malformed tools/list result: {e}")))?;

        if let Ok(mut guard) = self.shared.tools.write() {
            *guard = result.tools.clone();
        }

        Ok(result.tools)
    }

    /// Invoke a tool and await the correlated response.
    ///
    /// A connection-level failure moves the session to `Error`; a
    /// tool error payload or a timeout does not: the connection
    /// stays up and only this call fails.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> McpResult<ToolCallResult> {
        if *self.state_rx.borrow() != ConnectionState::Connected {
            return Err(McpError::NotConnected);
        }
        self.require_initialized()?;
        let transport = self
            .current_transport()
            .await
            .ok_or(McpError::NotConnected)?;

        debug!(server = %self.config.server_id, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        let request = JsonRpcRequest::new(
            self.next_request_id(),
            "tools/call",
            Some(serde_json::to_value(&params)?),
        );

        let response = match transport.request(request).await {
            Ok(response) => response,
            Err(e @ McpError::ConnectionFailed(_)) => {
                self.shared.fail(e.to_string());
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if let Some(error) = response.error {
            return Err(McpError::tool_error(error.message));
        }

        let result: ToolCallResult = serde_json::from_value(
            response
                .result
                .ok_or_else(|| McpError::protocol("Missing tools/call result"))?,
        )
        .map_err(|e| McpError::protocol(format!("Malformed tools/call result: {e}")))?;

        Ok(result)
    }

    /// Tear down the transport. Idempotent.
    pub async fn disconnect(&self) -> McpResult<()> {
        let transport = self.transport.write().await.take();
        self.initialized.store(false, Ordering::SeqCst);

        if let Some(transport) = transport {
            if let Err(e) = transport.close().await {
                warn!(server = %self.config.server_id, error = %e, "Error closing transport");
            }
        }

        if let Ok(mut guard) = self.shared.tools.write() {
            guard.clear();
        }
        self.shared.set_state(ConnectionState::Disconnected);
        Ok(())
    }

    /// Synchronous status snapshot. Never blocks on the network.
    pub fn status(&self) -> ServerStatus {
        ServerStatus {
            state: *self.state_rx.borrow(),
            tools: self
                .shared
                .tools
                .read()
                .map(|g| g.clone())
                .unwrap_or_default(),
            error: self
                .shared
                .last_error
                .read()
                .map(|g| g.clone())
                .unwrap_or_default(),
        }
    }

    /// Which transport the negotiation landed on, once connected.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.kind.read().ok().and_then(|g| *g)
    }

    /// The handshake result, once initialized.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.read().ok().and_then(|g| g.clone())
    }

    /// Resolve once the session is no longer live.
    ///
    /// Completes when the state reaches `Error` or `Disconnected`;
    /// the connection manager selects on this to schedule reconnects.
    pub async fn closed(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            if matches!(state, ConnectionState::Error | ConnectionState::Disconnected) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    fn require_initialized(&self) -> McpResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(McpError::protocol("Session is not initialized"))
        }
    }

    async fn current_transport(&self) -> Option<Arc<dyn Transport>> {
        self.transport.read().await.clone()
    }

    /// Install a transport directly, bypassing negotiation.
    #[cfg(test)]
    pub(crate) async fn connect_with(&self, transport: Arc<dyn Transport>) {
        *self.transport.write().await = Some(transport);
        self.shared.set_state(ConnectionState::Connected);
    }

    /// Force the session into an error state.
    #[cfg(test)]
    pub(crate) fn force_error(&self, reason: &str) {
        self.shared.fail(reason.to_string());
    }
}

impl std::fmt::Debug for McpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpSession")
            .field("server_id", &self.config.server_id)
            .field("state", &*self.state_rx.borrow())
            .field("kind", &self.transport_kind())
            .finish()
    }
}
