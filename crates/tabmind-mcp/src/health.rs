//! On-demand server health checks.
//!
//! A health check answers "is this server reachable and what tools
//! does it offer right now" using a disposable session, so the UI can
//! probe a server at any time without disturbing a live connection or
//! the reconnect loop's bookkeeping.

use crate::error::{McpError, McpResult};
use crate::manager::resolve_token;
use crate::protocol::McpTool;
use crate::server::ConnectionState;
use crate::session::{McpSession, SessionCallbacks, SessionConfig};
use crate::store::ServerStateStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tabmind_auth::AuthHelper;
use tracing::{debug, info};

/// Ceiling for the whole connect-initialize-list cycle.
///
/// Deliberately separate from the reconnect backoff ceiling: a health
/// check that hangs must fail, not wait out a backoff schedule.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(15);

/// Result of a successful health check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: ConnectionState,
    pub tools: Vec<McpTool>,
    pub tool_count: usize,
}

/// Probes servers with disposable sessions.
pub struct HealthChecker {
    store: Arc<ServerStateStore>,
    auth: AuthHelper,
    timeout: Duration,
}

impl HealthChecker {
    /// Create a checker with the default ceiling.
    pub fn new(store: Arc<ServerStateStore>, auth: AuthHelper) -> Self {
        Self {
            store,
            auth,
            timeout: HEALTH_CHECK_TIMEOUT,
        }
    }

    /// Override the ceiling (tests).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a throwaway connect → initialize → list-tools cycle.
    ///
    /// The disposable session is disconnected unconditionally,
    /// success or failure, and the persistent [`ServerStateStore`]
    /// entry (including any live client) is never touched.
    pub async fn perform_health_check(&self, server_id: &str) -> McpResult<HealthReport> {
        let config = self
            .store
            .get_server_config(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;
        config.validate()?;

        let token = resolve_token(&self.auth, &config).await?;

        let mut session_config = SessionConfig::new(&config.id, &config.name, &config.url);
        session_config.bearer_token = token;
        let session = McpSession::new(session_config, SessionCallbacks::default());

        debug!(server = %server_id, "Running health check");

        let probed = tokio::time::timeout(self.timeout, async {
            session.connect().await?;
            session.initialize().await?;
            session.list_tools().await
        })
        .await
        .unwrap_or(Err(McpError::Timeout));

        // Teardown happens on every path
        let _ = session.disconnect().await;

        let tools = probed?;
        if tools.is_empty() {
            return Err(McpError::NoTools(server_id.to_string()));
        }

        info!(
            server = %server_id,
            tool_count = tools.len(),
            "Health check passed"
        );

        Ok(HealthReport {
            state: ConnectionState::Connected,
            tool_count: tools.len(),
            tools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use tabmind_auth::LocalStore;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn checker(url: &str) -> (HealthChecker, Arc<ServerStateStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ServerStateStore::new(vec![ServerConfig::open(
            "alpha",
            "Alpha",
            format!("{url}/mcp"),
        )]));
        let auth = AuthHelper::new(Arc::new(LocalStore::with_path(
            dir.path().join("store.json"),
        )));
        (HealthChecker::new(store.clone(), auth), store, dir)
    }

    async fn mount_healthy_server(server: &MockServer, tools: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_string_contains("\"method\":\"ping\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}),
            ))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"method\":\"initialize\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 2,
                "result": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {"tools": {"listChanged": false}},
                    "serverInfo": {"name": "probe-target"}
                }
            })))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("notifications/initialized"))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(body_string_contains("\"method\":\"tools/list\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "jsonrpc": "2.0", "id": 3, "result": {"tools": tools}
            })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_health_check_success() {
        let server = MockServer::start().await;
        mount_healthy_server(
            &server,
            serde_json::json!([{"name": "search", "inputSchema": {"type": "object"}}]),
        )
        .await;

        let (checker, _store, _dir) = checker(&server.uri());
        let report = checker.perform_health_check("alpha").await.unwrap();
        assert_eq!(report.state, ConnectionState::Connected);
        assert_eq!(report.tool_count, 1);
        assert_eq!(report.tools[0].name, "search");
    }

    #[tokio::test]
    async fn test_health_check_unknown_server() {
        let server = MockServer::start().await;
        let (checker, _store, _dir) = checker(&server.uri());
        let result = checker.perform_health_check("nope").await;
        assert!(matches!(result, Err(McpError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn test_health_check_zero_tools_is_failure() {
        let server = MockServer::start().await;
        mount_healthy_server(&server, serde_json::json!([])).await;

        let (checker, _store, _dir) = checker(&server.uri());
        let result = checker.perform_health_check("alpha").await;
        assert!(matches!(result, Err(McpError::NoTools(_))));
    }

    #[tokio::test]
    async fn test_health_check_unreachable_server() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(ServerStateStore::new(vec![ServerConfig::open(
            "alpha",
            "Alpha",
            "http://127.0.0.1:1/mcp",
        )]));
        let auth = AuthHelper::new(Arc::new(LocalStore::with_path(
            dir.path().join("store.json"),
        )));
        let checker = HealthChecker::new(store, auth);

        let result = checker.perform_health_check("alpha").await;
        assert!(matches!(result, Err(McpError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_health_check_auth_required_without_tokens() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::open("alpha", "Alpha", format!("{}/mcp", server.uri()))
            .with_oauth(tabmind_auth::OAuthEndpoints {
                register_url: format!("{}/register", server.uri()),
                auth_url: format!("{}/authorize", server.uri()),
                token_url: format!("{}/token", server.uri()),
                introspect_url: None,
                resource: None,
            });
        let store = Arc::new(ServerStateStore::new(vec![config]));
        let auth = AuthHelper::new(Arc::new(LocalStore::with_path(
            dir.path().join("store.json"),
        )));
        let checker = HealthChecker::new(store, auth);

        let result = checker.perform_health_check("alpha").await;
        assert!(matches!(result, Err(McpError::AuthRequired)));
    }

    #[tokio::test]
    async fn test_health_check_never_touches_live_client() {
        let server = MockServer::start().await;
        mount_healthy_server(
            &server,
            serde_json::json!([{"name": "search", "inputSchema": {"type": "object"}}]),
        )
        .await;

        let (checker, store, _dir) = checker(&server.uri());

        // Install a live client in the persistent store
        let live = Arc::new(McpSession::new(
            SessionConfig::new("alpha", "Alpha", format!("{}/mcp", server.uri())),
            SessionCallbacks::default(),
        ));
        store
            .mark_connected("alpha", live.clone(), vec![])
            .await
            .unwrap();

        checker.perform_health_check("alpha").await.unwrap();

        // The persistent client reference and status are untouched
        let state = store.get_server_state("alpha").await.unwrap();
        assert!(Arc::ptr_eq(state.client.as_ref().unwrap(), &live));
        assert_eq!(state.status.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_health_check_timeout_ceiling() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let (checker, _store, _dir) = checker(&server.uri());
        let checker = checker.with_timeout(Duration::from_millis(100));

        let result = checker.perform_health_check("alpha").await;
        assert!(matches!(result, Err(McpError::Timeout)));
    }
}
