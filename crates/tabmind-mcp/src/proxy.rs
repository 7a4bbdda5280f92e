//! Tool proxy.
//!
//! Presents one flat catalog of tools aggregated from every connected
//! server and routes each invocation to the owning server's live
//! session. Calls carrying identical arguments inside a short window
//! collapse onto one execution: an LLM re-issuing the same call from
//! a retried reasoning step must not hit the remote tool twice.

use crate::error::McpError;
use crate::protocol::{McpTool, ToolCallResult, ToolContent};
use crate::schema::ToolParams;
use crate::store::ServerStateStore;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tabmind_protocol::Outcome;
use tracing::{debug, warn};

/// Proxy tunables.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Window inside which identical invocations share one outcome.
    /// A heuristic guard, not a correctness contract.
    pub dedupe_window: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(3),
        }
    }
}

/// A tool tagged with the server it came from.
///
/// The tag disambiguates identically-named tools across servers:
/// whatever happens to the display name in a flat catalog, execution
/// routes by `server_id`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedTool {
    pub server_id: String,
    pub server_name: String,
    #[serde(flatten)]
    pub tool: McpTool,
}

impl TaggedTool {
    /// Validator for this tool's input schema.
    pub fn params(&self) -> ToolParams {
        ToolParams::from_schema(self.tool.input_schema.as_ref())
    }
}

struct DedupeEntry {
    at: Instant,
    outcome: Shared<BoxFuture<'static, Outcome>>,
}

/// Aggregates catalogs and routes tool calls across servers.
pub struct ToolProxy {
    store: Arc<ServerStateStore>,
    config: ProxyConfig,
    recent: Mutex<HashMap<String, DedupeEntry>>,
}

impl ToolProxy {
    /// Create a proxy with default tunables.
    pub fn new(store: Arc<ServerStateStore>) -> Self {
        Self::with_config(store, ProxyConfig::default())
    }

    /// Create a proxy with explicit tunables.
    pub fn with_config(store: Arc<ServerStateStore>, config: ProxyConfig) -> Self {
        Self {
            store,
            config,
            recent: Mutex::new(HashMap::new()),
        }
    }

    /// Every tool from every connected server, tagged with its
    /// origin.
    ///
    /// Servers that are disconnected or errored contribute nothing,
    /// even if they were connected moments ago; a server that fails
    /// the listing is skipped rather than failing the aggregate.
    pub async fn all_tools(&self) -> Vec<TaggedTool> {
        let mut catalog = Vec::new();

        for (config, client) in self.store.connected_clients().await {
            match client.list_tools().await {
                Ok(tools) => {
                    let _ = self.store.set_tools(&config.id, tools.clone()).await;
                    catalog.extend(tools.into_iter().map(|tool| TaggedTool {
                        server_id: config.id.clone(),
                        server_name: config.name.clone(),
                        tool,
                    }));
                }
                Err(e) => {
                    warn!(
                        server = %config.id,
                        error = %e,
                        "Skipping server during catalog aggregation"
                    );
                }
            }
        }

        catalog
    }

    /// Flat name-keyed lookup table.
    ///
    /// On a name collision the later registration wins, but the
    /// shadowing is logged, and every entry keeps its `server_id`,
    /// so routing is unaffected by display-name collisions.
    pub async fn flat_catalog(&self) -> HashMap<String, TaggedTool> {
        let mut table: HashMap<String, TaggedTool> = HashMap::new();

        for tagged in self.all_tools().await {
            let name = tagged.tool.name.clone();
            let server_id = tagged.server_id.clone();
            if let Some(previous) = table.insert(name.clone(), tagged) {
                warn!(
                    tool = %name,
                    shadowed = %previous.server_id,
                    winner = %server_id,
                    "Tool name collision; later registration shadows earlier"
                );
            }
        }

        table
    }

    /// Execute a tool on a specific server.
    ///
    /// Always returns an envelope, never panics or throws: a missing
    /// live client yields `{success: false, error: "Not connected"}`.
    pub async fn call_server_tool(&self, server_id: &str, name: &str, arguments: Value) -> Outcome {
        let key = dedupe_key(server_id, name, &arguments);

        let shared = {
            let mut recent = self.recent.lock().unwrap_or_else(|e| e.into_inner());
            let window = self.config.dedupe_window;
            recent.retain(|_, entry| entry.at.elapsed() < window);

            match recent.get(&key) {
                Some(entry) => {
                    debug!(server = %server_id, tool = %name, "Duplicate invocation suppressed");
                    entry.outcome.clone()
                }
                None => {
                    let store = self.store.clone();
                    let server_id = server_id.to_string();
                    let name = name.to_string();
                    let shared = async move { execute(store, server_id, name, arguments).await }
                        .boxed()
                        .shared();
                    recent.insert(
                        key,
                        DedupeEntry {
                            at: Instant::now(),
                            outcome: shared.clone(),
                        },
                    );
                    shared
                }
            }
        };

        shared.await
    }
}

impl std::fmt::Debug for ToolProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolProxy")
            .field("dedupe_window", &self.config.dedupe_window)
            .finish()
    }
}

async fn execute(
    store: Arc<ServerStateStore>,
    server_id: String,
    name: String,
    arguments: Value,
) -> Outcome {
    let Some(client) = store.connected_client(&server_id).await else {
        return Outcome::err(McpError::NotConnected.to_string());
    };

    debug!(server = %server_id, tool = %name, "Routing tool call");

    match client.call_tool(&name, arguments).await {
        Ok(result) if result.is_error => Outcome::err(error_text(&result)),
        Ok(result) => match serde_json::to_value(&result) {
            Ok(value) => Outcome::ok(value),
            Err(e) => Outcome::err(format!("Unserializable tool result: {e}")),
        },
        Err(e) => Outcome::err(e.to_string()),
    }
}

/// Pull a readable message out of an errored tool result.
fn error_text(result: &ToolCallResult) -> String {
    let text: Vec<&str> = result
        .content
        .iter()
        .filter_map(|c| match c {
            ToolContent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    if text.is_empty() {
        "Tool reported an error".to_string()
    } else {
        text.join("\n")
    }
}

fn dedupe_key(server_id: &str, name: &str, arguments: &Value) -> String {
    let args = serde_json::to_string(arguments).unwrap_or_default();
    format!("{server_id}\u{1f}{name}\u{1f}{args}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ServerConfig;
    use crate::session::{McpSession, SessionCallbacks, SessionConfig};
    use crate::testing::MockTransport;
    use serde_json::json;

    fn store() -> Arc<ServerStateStore> {
        Arc::new(ServerStateStore::new(vec![
            ServerConfig::open("alpha", "Alpha", "https://alpha.example.com/mcp"),
            ServerConfig::open("beta", "Beta", "https://beta.example.com/mcp"),
        ]))
    }

    async fn connect_mock(
        store: &Arc<ServerStateStore>,
        server_id: &str,
        tools: Vec<Value>,
    ) -> Arc<MockTransport> {
        let mock = MockTransport::with_tools(tools);
        let session = Arc::new(McpSession::new(
            SessionConfig::new(server_id, server_id, "https://example.com/mcp"),
            SessionCallbacks::default(),
        ));
        session.connect_with(mock.clone()).await;
        session.initialize().await.unwrap();
        let tools = session.list_tools().await.unwrap();
        store
            .mark_connected(server_id, session, tools)
            .await
            .unwrap();
        mock
    }

    fn tool(name: &str) -> Value {
        json!({"name": name, "inputSchema": {"type": "object"}})
    }

    #[tokio::test]
    async fn test_all_tools_unions_connected_servers() {
        let store = store();
        connect_mock(&store, "alpha", vec![tool("a1"), tool("a2")]).await;
        connect_mock(&store, "beta", vec![tool("b1")]).await;

        let proxy = ToolProxy::new(store);
        let mut names: Vec<(String, String)> = proxy
            .all_tools()
            .await
            .into_iter()
            .map(|t| (t.server_id, t.tool.name))
            .collect();
        names.sort();

        assert_eq!(
            names,
            vec![
                ("alpha".to_string(), "a1".to_string()),
                ("alpha".to_string(), "a2".to_string()),
                ("beta".to_string(), "b1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_all_tools_excludes_errored_server() {
        let store = store();
        connect_mock(&store, "alpha", vec![tool("a1")]).await;
        connect_mock(&store, "beta", vec![tool("b1")]).await;

        // Beta was connected moments ago, then dropped
        store.mark_error("beta", "stream closed").await.unwrap();

        let proxy = ToolProxy::new(store);
        let tools = proxy.all_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].server_id, "alpha");
    }

    #[tokio::test]
    async fn test_flat_catalog_collision_keeps_routing_tag() {
        let store = store();
        connect_mock(&store, "alpha", vec![tool("dup")]).await;
        connect_mock(&store, "beta", vec![tool("dup")]).await;

        let proxy = ToolProxy::new(store);

        // Both tagged entries survive in the full catalog
        let all = proxy.all_tools().await;
        assert_eq!(all.len(), 2);

        // The flat table shadows one, but the survivor still carries
        // a real server id for routing
        let flat = proxy.flat_catalog().await;
        assert_eq!(flat.len(), 1);
        let survivor = &flat["dup"];
        assert!(survivor.server_id == "alpha" || survivor.server_id == "beta");
    }

    #[tokio::test]
    async fn test_call_without_client_returns_envelope() {
        let proxy = ToolProxy::new(store());
        let outcome = proxy
            .call_server_tool("alpha", "anything", json!({}))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Not connected"));
    }

    #[tokio::test]
    async fn test_call_unknown_server_returns_envelope() {
        let proxy = ToolProxy::new(store());
        let outcome = proxy.call_server_tool("ghost", "x", json!({})).await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Not connected"));
    }

    #[tokio::test]
    async fn test_call_success_envelope() {
        let store = store();
        connect_mock(&store, "alpha", vec![tool("echo")]).await;

        let proxy = ToolProxy::new(store);
        let outcome = proxy
            .call_server_tool("alpha", "echo", json!({"text": "hi"}))
            .await;
        assert!(outcome.success);
        let data = outcome.data.unwrap();
        assert_eq!(data["content"][0]["text"], "ok");
    }

    #[tokio::test]
    async fn test_tool_error_payload_becomes_failed_envelope() {
        let store = store();
        let mock = connect_mock(&store, "alpha", vec![tool("echo")]).await;
        mock.fail_method("tools/call", -32000, "remote tool broke");

        let proxy = ToolProxy::new(store.clone());
        let outcome = proxy.call_server_tool("alpha", "echo", json!({})).await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("remote tool broke"));

        // The connection survives a tool-execution error
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(
            state.status.state,
            crate::server::ConnectionState::Connected
        );
    }

    #[tokio::test]
    async fn test_duplicate_calls_share_one_execution() {
        let store = store();
        let mock = connect_mock(&store, "alpha", vec![tool("echo")]).await;

        let proxy = ToolProxy::new(store);
        let args = json!({"text": "same"});

        let first = proxy.call_server_tool("alpha", "echo", args.clone()).await;
        let second = proxy.call_server_tool("alpha", "echo", args).await;

        assert!(first.success);
        assert_eq!(
            serde_json::to_string(&first.data).unwrap(),
            serde_json::to_string(&second.data).unwrap()
        );
        // One network round-trip, not two
        assert_eq!(mock.call_count("tools/call"), 1);
    }

    #[tokio::test]
    async fn test_different_arguments_execute_separately() {
        let store = store();
        let mock = connect_mock(&store, "alpha", vec![tool("echo")]).await;

        let proxy = ToolProxy::new(store);
        proxy
            .call_server_tool("alpha", "echo", json!({"text": "one"}))
            .await;
        proxy
            .call_server_tool("alpha", "echo", json!({"text": "two"}))
            .await;

        assert_eq!(mock.call_count("tools/call"), 2);
    }

    #[tokio::test]
    async fn test_duplicate_beyond_window_reexecutes() {
        let store = store();
        let mock = connect_mock(&store, "alpha", vec![tool("echo")]).await;

        let proxy = ToolProxy::with_config(
            store,
            ProxyConfig {
                dedupe_window: Duration::from_millis(30),
            },
        );
        let args = json!({"text": "same"});

        proxy.call_server_tool("alpha", "echo", args.clone()).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        proxy.call_server_tool("alpha", "echo", args).await;

        assert_eq!(mock.call_count("tools/call"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_duplicates_share_inflight_call() {
        let store = store();
        let mock = connect_mock(&store, "alpha", vec![tool("echo")]).await;

        let proxy = Arc::new(ToolProxy::new(store));
        let args = json!({"text": "racing"});

        let a = {
            let proxy = proxy.clone();
            let args = args.clone();
            tokio::spawn(async move { proxy.call_server_tool("alpha", "echo", args).await })
        };
        let b = {
            let proxy = proxy.clone();
            tokio::spawn(async move { proxy.call_server_tool("alpha", "echo", args).await })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        assert!(a.success && b.success);
        assert_eq!(mock.call_count("tools/call"), 1);
    }

    #[tokio::test]
    async fn test_same_tool_different_servers_not_deduped() {
        let store = store();
        let mock_a = connect_mock(&store, "alpha", vec![tool("echo")]).await;
        let mock_b = connect_mock(&store, "beta", vec![tool("echo")]).await;

        let proxy = ToolProxy::new(store);
        let args = json!({"text": "same"});
        proxy.call_server_tool("alpha", "echo", args.clone()).await;
        proxy.call_server_tool("beta", "echo", args).await;

        assert_eq!(mock_a.call_count("tools/call"), 1);
        assert_eq!(mock_b.call_count("tools/call"), 1);
    }

    #[tokio::test]
    async fn test_tagged_tool_params_conversion() {
        let tagged = TaggedTool {
            server_id: "alpha".to_string(),
            server_name: "Alpha".to_string(),
            tool: McpTool {
                name: "search".to_string(),
                description: None,
                input_schema: Some(json!({
                    "type": "object",
                    "properties": {"q": {"type": "string"}},
                    "required": ["q"]
                })),
            },
        };

        let params = tagged.params();
        assert!(params.validate(&json!({})).is_err());
        assert!(params.validate(&json!({"q": "x"})).is_ok());
    }
}
