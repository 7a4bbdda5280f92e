//! Connection manager and reconnect loop.
//!
//! For every enabled server the manager guarantees that either a
//! live, initialized session sits in the state store, or a
//! bounded-backoff reconnection attempt is in flight. Lifecycle
//! transitions for one server are strictly sequential: a single
//! supervision task owns them, so a second connect can never start
//! while one is already running.

use crate::backoff::{sleep_with_cancel, Backoff};
use crate::error::{McpError, McpResult};
use crate::protocol::McpTool;
use crate::server::ServerConfig;
use crate::session::{McpSession, SessionCallbacks, SessionConfig};
use crate::store::ServerStateStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tabmind_auth::AuthHelper;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tunables for the manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// First reconnect delay.
    pub backoff_initial: Duration,
    /// Delay multiplier per consecutive failure.
    pub backoff_multiplier: u32,
    /// Reconnect delay ceiling.
    pub backoff_max: Duration,
    /// Per-request timeout handed to sessions.
    pub request_timeout: Duration,
    /// Transport establishment timeout handed to sessions.
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_millis(crate::backoff::BACKOFF_INITIAL_DELAY_MS),
            backoff_multiplier: crate::backoff::BACKOFF_MULTIPLIER,
            backoff_max: Duration::from_millis(crate::backoff::BACKOFF_MAX_DELAY_MS),
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Owns the long-lived session per enabled server.
pub struct ConnectionManager {
    store: Arc<ServerStateStore>,
    auth: AuthHelper,
    config: ManagerConfig,
    /// Cancellation handle per running supervision task.
    loops: Mutex<HashMap<String, CancellationToken>>,
}

impl ConnectionManager {
    /// Create a manager with default tunables.
    pub fn new(store: Arc<ServerStateStore>, auth: AuthHelper) -> Self {
        Self::with_config(store, auth, ManagerConfig::default())
    }

    /// Create a manager with explicit tunables.
    pub fn with_config(
        store: Arc<ServerStateStore>,
        auth: AuthHelper,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            auth,
            config,
            loops: Mutex::new(HashMap::new()),
        }
    }

    /// The state store this manager drives.
    pub fn store(&self) -> &Arc<ServerStateStore> {
        &self.store
    }

    /// Reconnect every server the user had enabled in a previous
    /// session.
    pub async fn startup(&self) {
        for server_id in self.store.server_ids() {
            let enabled = self
                .auth
                .server_enabled(&server_id)
                .await
                .unwrap_or_default()
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            if let Err(e) = self.enable_server(&server_id).await {
                warn!(server = %server_id, error = %e, "Failed to re-enable server at startup");
            }
        }
    }

    /// Enable a server and start supervising its connection.
    pub async fn enable_server(&self, server_id: &str) -> McpResult<()> {
        let config = self
            .store
            .get_server_config(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        config.validate()?;

        self.auth.set_server_enabled(server_id, true).await?;
        self.store.set_enabled(server_id, true).await?;

        let mut loops = self.loops.lock().await;
        if let Some(existing) = loops.get(server_id) {
            if !existing.is_cancelled() {
                debug!(server = %server_id, "Supervision already running");
                return Ok(());
            }
        }

        let cancel = CancellationToken::new();
        loops.insert(server_id.to_string(), cancel.clone());

        info!(server = %server_id, "Server enabled");
        tokio::spawn(supervise(
            self.store.clone(),
            self.auth.clone(),
            config,
            self.config.clone(),
            cancel,
        ));
        Ok(())
    }

    /// Disable a server: stop supervision and drop the connection.
    ///
    /// Tokens are left intact; disabling is not de-authorizing.
    pub async fn disable_server(&self, server_id: &str) -> McpResult<()> {
        self.auth.set_server_enabled(server_id, false).await?;
        self.store.set_enabled(server_id, false).await?;

        if let Some(cancel) = self.loops.lock().await.remove(server_id) {
            cancel.cancel();
        }

        if let Some(client) = self.store.connected_client(server_id).await {
            let _ = client.disconnect().await;
        }
        self.store.mark_disconnected(server_id).await?;

        info!(server = %server_id, "Server disabled");
        Ok(())
    }

    /// Tear down and re-establish a server's connection.
    pub async fn reconnect_server(&self, server_id: &str) -> McpResult<()> {
        if let Some(cancel) = self.loops.lock().await.remove(server_id) {
            cancel.cancel();
        }
        if let Some(client) = self.store.connected_client(server_id).await {
            let _ = client.disconnect().await;
        }
        self.store.mark_disconnected(server_id).await?;
        self.enable_server(server_id).await
    }

    /// Stop every supervision task and disconnect every live session.
    pub async fn shutdown(&self) {
        let cancels: Vec<CancellationToken> =
            self.loops.lock().await.drain().map(|(_, c)| c).collect();
        for cancel in cancels {
            cancel.cancel();
        }

        for state in self.store.all_states().await {
            if let Some(client) = state.client {
                let _ = client.disconnect().await;
            }
            let _ = self.store.mark_disconnected(&state.config.id).await;
        }

        info!("Connection manager shut down");
    }
}

/// One reconnect loop, owning every lifecycle transition for its
/// server until cancelled or a terminal error.
async fn supervise(
    store: Arc<ServerStateStore>,
    auth: AuthHelper,
    config: Arc<ServerConfig>,
    manager_config: ManagerConfig,
    cancel: CancellationToken,
) {
    let server_id = config.id.clone();
    let mut backoff = Backoff::new(
        manager_config.backoff_initial,
        manager_config.backoff_multiplier,
        manager_config.backoff_max,
    );

    loop {
        if cancel.is_cancelled() {
            break;
        }
        if store.mark_connecting(&server_id).await.is_err() {
            break;
        }

        match establish(&store, &auth, &config, &manager_config).await {
            Ok((session, tools)) => {
                backoff.reset();

                if cancel.is_cancelled() {
                    let _ = session.disconnect().await;
                    let _ = store.mark_disconnected(&server_id).await;
                    break;
                }

                let tool_count = tools.len();
                if store
                    .mark_connected(&server_id, session.clone(), tools)
                    .await
                    .is_err()
                {
                    break;
                }
                info!(server = %server_id, tool_count, "MCP server connected");

                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = session.disconnect().await;
                        let _ = store.mark_disconnected(&server_id).await;
                        break;
                    }
                    _ = session.closed() => {
                        let reason = session
                            .status()
                            .error
                            .unwrap_or_else(|| "Connection lost".to_string());
                        warn!(server = %server_id, reason = %reason, "MCP connection dropped");
                        let _ = store.mark_error(&server_id, reason).await;
                    }
                }
            }
            Err(e) if !e.is_retryable() => {
                // Auth and config failures cannot heal on their own;
                // spinning against them would never succeed.
                warn!(
                    server = %server_id,
                    error = %e,
                    "Connection failed; supervision stopped until re-enable"
                );
                let _ = store.mark_error(&server_id, e.to_string()).await;
                break;
            }
            Err(e) => {
                debug!(server = %server_id, error = %e, "Connect attempt failed");
                let _ = store.mark_error(&server_id, e.to_string()).await;
            }
        }

        let delay = backoff.next_delay();
        if !sleep_with_cancel(delay, &cancel).await {
            let _ = store.mark_disconnected(&server_id).await;
            break;
        }
    }
}

/// Resolve a token, build a session, connect, initialize, list tools.
async fn establish(
    store: &Arc<ServerStateStore>,
    auth: &AuthHelper,
    config: &Arc<ServerConfig>,
    manager_config: &ManagerConfig,
) -> McpResult<(Arc<McpSession>, Vec<McpTool>)> {
    let token = resolve_token(auth, config).await?;
    let _ = store
        .set_tokens(&config.id, auth.tokens(&config.id).await.unwrap_or_default())
        .await;

    let mut session_config = SessionConfig::new(&config.id, &config.name, &config.url);
    session_config.bearer_token = token;
    session_config.request_timeout = manager_config.request_timeout;
    session_config.connect_timeout = manager_config.connect_timeout;

    let session = Arc::new(McpSession::new(session_config, SessionCallbacks::default()));
    session.connect().await?;

    let handshake = async {
        session.initialize().await?;
        session.list_tools().await
    }
    .await;

    match handshake {
        Ok(tools) => Ok((session, tools)),
        Err(e) => {
            // A half-established session must not leak its transport
            let _ = session.disconnect().await;
            Err(e)
        }
    }
}

/// Produce a currently-valid bearer token for a server.
///
/// Returns `Ok(None)` for servers without authentication. For
/// authenticated servers a missing or unrefreshable token is
/// `AuthRequired`: the caller must surface "needs re-authorization"
/// instead of retrying.
pub(crate) async fn resolve_token(
    auth: &AuthHelper,
    config: &ServerConfig,
) -> McpResult<Option<String>> {
    if !config.requires_authentication {
        return Ok(None);
    }

    let endpoints = config
        .oauth
        .clone()
        .ok_or_else(|| McpError::Config(format!("Server '{}' has no OAuth endpoints", config.id)))?;

    let refresher = auth.clone();
    let token = auth
        .ensure_valid_token(&config.id, move |server_id| async move {
            refresher.refresh_server_token(&server_id, &endpoints).await
        })
        .await?;

    match token {
        Some(token) => Ok(Some(token)),
        None => Err(McpError::AuthRequired),
    }
}
