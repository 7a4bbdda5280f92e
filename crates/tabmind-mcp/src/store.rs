//! Process-wide server state store.
//!
//! One injectable [`ServerStateStore`] instance is the single source
//! of truth for connection, auth, and tool state; every other
//! component reads and writes through it. Each mutation happens
//! inside one write-lock critical section, so the client/status
//! invariant can never be observed half-applied.

use crate::error::{McpError, McpResult};
use crate::protocol::McpTool;
use crate::server::{ConnectionState, ServerConfig, ServerState, ServerStatus};
use crate::session::McpSession;
use std::collections::HashMap;
use std::sync::Arc;
use tabmind_auth::StoredTokens;
use tokio::sync::RwLock;
use tracing::debug;

/// Map from server id to runtime state, seeded from the configured
/// server list at startup.
///
/// Entries are never deleted during a session (only their mutable
/// fields change), so catalog aggregation can always find every
/// configured server by id.
pub struct ServerStateStore {
    configs: HashMap<String, Arc<ServerConfig>>,
    states: RwLock<HashMap<String, ServerState>>,
}

impl ServerStateStore {
    /// Create a store for the given configured servers.
    pub fn new(configs: Vec<ServerConfig>) -> Self {
        let configs: HashMap<String, Arc<ServerConfig>> = configs
            .into_iter()
            .map(|c| (c.id.clone(), Arc::new(c)))
            .collect();

        let states = configs
            .iter()
            .map(|(id, config)| (id.clone(), ServerState::new(config.clone())))
            .collect();

        Self {
            configs,
            states: RwLock::new(states),
        }
    }

    /// The static config for a server, or `None` if the id is not in
    /// the configured list (distinct from "not yet connected").
    pub fn get_server_config(&self, server_id: &str) -> Option<Arc<ServerConfig>> {
        self.configs.get(server_id).cloned()
    }

    /// Ids of every configured server.
    pub fn server_ids(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    /// The state entry for a server, creating a default disconnected
    /// entry if none exists yet. Returns `None` only for ids missing
    /// from the configured list.
    pub async fn get_server_state(&self, server_id: &str) -> Option<ServerState> {
        {
            let states = self.states.read().await;
            if let Some(state) = states.get(server_id) {
                return Some(state.clone());
            }
        }

        let config = self.get_server_config(server_id)?;
        let mut states = self.states.write().await;
        Some(
            states
                .entry(server_id.to_string())
                .or_insert_with(|| ServerState::new(config))
                .clone(),
        )
    }

    /// Snapshot of every server's state.
    pub async fn all_states(&self) -> Vec<ServerState> {
        self.states.read().await.values().cloned().collect()
    }

    /// The live session for a server, if it is connected.
    pub async fn connected_client(&self, server_id: &str) -> Option<Arc<McpSession>> {
        self.states
            .read()
            .await
            .get(server_id)
            .and_then(|s| s.client.clone())
    }

    /// Every connected server with its live session.
    pub async fn connected_clients(&self) -> Vec<(Arc<ServerConfig>, Arc<McpSession>)> {
        self.states
            .read()
            .await
            .values()
            .filter(|s| s.status.state == ConnectionState::Connected)
            .filter_map(|s| s.client.clone().map(|c| (s.config.clone(), c)))
            .collect()
    }

    /// Record that a connection attempt is starting.
    pub async fn mark_connecting(&self, server_id: &str) -> McpResult<()> {
        self.mutate(server_id, |state| {
            state.client = None;
            state.status = ServerStatus {
                state: ConnectionState::Connecting,
                tools: Vec::new(),
                error: None,
            };
        })
        .await
    }

    /// Record a successful connect: status and client change together.
    pub async fn mark_connected(
        &self,
        server_id: &str,
        client: Arc<McpSession>,
        tools: Vec<McpTool>,
    ) -> McpResult<()> {
        self.mutate(server_id, |state| {
            state.status = ServerStatus {
                state: ConnectionState::Connected,
                tools,
                error: None,
            };
            state.client = Some(client);
        })
        .await
    }

    /// Record a failure: the client is dropped in the same section.
    pub async fn mark_error(&self, server_id: &str, error: impl Into<String>) -> McpResult<()> {
        let error = error.into();
        self.mutate(server_id, |state| {
            state.client = None;
            state.status = ServerStatus {
                state: ConnectionState::Error,
                tools: Vec::new(),
                error: Some(error),
            };
        })
        .await
    }

    /// Record an orderly disconnect.
    pub async fn mark_disconnected(&self, server_id: &str) -> McpResult<()> {
        self.mutate(server_id, |state| {
            state.client = None;
            state.status = ServerStatus::default();
        })
        .await
    }

    /// Flip the user's enable toggle.
    pub async fn set_enabled(&self, server_id: &str, enabled: bool) -> McpResult<()> {
        self.mutate(server_id, |state| {
            state.is_enabled = enabled;
        })
        .await
    }

    /// Update the in-memory token snapshot.
    pub async fn set_tokens(
        &self,
        server_id: &str,
        tokens: Option<StoredTokens>,
    ) -> McpResult<()> {
        self.mutate(server_id, |state| {
            state.tokens = tokens;
        })
        .await
    }

    /// Refresh the cached tool catalog of a connected server.
    pub async fn set_tools(&self, server_id: &str, tools: Vec<McpTool>) -> McpResult<()> {
        self.mutate(server_id, |state| {
            if state.status.state == ConnectionState::Connected {
                state.status.tools = tools;
            }
        })
        .await
    }

    /// Apply one mutation inside a single write-lock section.
    async fn mutate<F>(&self, server_id: &str, f: F) -> McpResult<()>
    where
        F: FnOnce(&mut ServerState),
    {
        let config = self
            .get_server_config(server_id)
            .ok_or_else(|| McpError::ServerNotFound(server_id.to_string()))?;

        let mut states = self.states.write().await;
        let state = states
            .entry(server_id.to_string())
            .or_insert_with(|| ServerState::new(config));
        f(state);
        debug_assert!(state.invariant_holds());
        debug!(server = %server_id, state = ?state.status.state, "State updated");
        Ok(())
    }
}

impl std::fmt::Debug for ServerStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerStateStore")
            .field("servers", &self.configs.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionCallbacks, SessionConfig};

    fn store() -> ServerStateStore {
        ServerStateStore::new(vec![
            ServerConfig::open("alpha", "Alpha", "https://alpha.example.com/mcp"),
            ServerConfig::open("beta", "Beta", "https://beta.example.com/mcp"),
        ])
    }

    fn session(id: &str) -> Arc<McpSession> {
        Arc::new(McpSession::new(
            SessionConfig::new(id, id, "https://example.com/mcp"),
            SessionCallbacks::default(),
        ))
    }

    #[tokio::test]
    async fn test_seeded_entries_are_disconnected() {
        let store = store();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.state, ConnectionState::Disconnected);
        assert!(state.client.is_none());
        assert!(state.invariant_holds());
    }

    #[tokio::test]
    async fn test_unknown_server_has_no_state_or_config() {
        let store = store();
        assert!(store.get_server_config("gamma").is_none());
        assert!(store.get_server_state("gamma").await.is_none());
    }

    #[tokio::test]
    async fn test_invariant_through_transitions() {
        let store = store();

        store.mark_connecting("alpha").await.unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.state, ConnectionState::Connecting);
        assert!(state.invariant_holds());

        store
            .mark_connected("alpha", session("alpha"), vec![])
            .await
            .unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.state, ConnectionState::Connected);
        assert!(state.client.is_some());
        assert!(state.invariant_holds());

        store.mark_error("alpha", "stream dropped").await.unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.state, ConnectionState::Error);
        assert!(state.client.is_none());
        assert_eq!(state.status.error.as_deref(), Some("stream dropped"));
        assert!(state.invariant_holds());

        store.mark_disconnected("alpha").await.unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.state, ConnectionState::Disconnected);
        assert!(state.invariant_holds());
    }

    #[tokio::test]
    async fn test_mutation_on_unknown_server_fails() {
        let store = store();
        let result = store.mark_connecting("gamma").await;
        assert!(matches!(result, Err(McpError::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn test_connected_clients_filters_by_state() {
        let store = store();
        store
            .mark_connected("alpha", session("alpha"), vec![])
            .await
            .unwrap();
        store.mark_error("beta", "down").await.unwrap();

        let connected = store.connected_clients().await;
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].0.id, "alpha");

        assert!(store.connected_client("alpha").await.is_some());
        assert!(store.connected_client("beta").await.is_none());
    }

    #[tokio::test]
    async fn test_entries_survive_disconnect() {
        let store = store();
        store
            .mark_connected("alpha", session("alpha"), vec![])
            .await
            .unwrap();
        store.mark_disconnected("alpha").await.unwrap();

        // The entry still exists and is findable by id
        assert!(store.get_server_state("alpha").await.is_some());
        assert_eq!(store.all_states().await.len(), 2);
    }

    #[tokio::test]
    async fn test_set_enabled_preserves_connection_fields() {
        let store = store();
        store.set_enabled("alpha", true).await.unwrap();

        let state = store.get_server_state("alpha").await.unwrap();
        assert!(state.is_enabled);
        assert_eq!(state.status.state, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_set_tools_only_when_connected() {
        let store = store();
        let tool = McpTool {
            name: "search".to_string(),
            description: None,
            input_schema: None,
        };

        // Ignored while disconnected
        store.set_tools("alpha", vec![tool.clone()]).await.unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert!(state.status.tools.is_empty());

        store
            .mark_connected("alpha", session("alpha"), vec![])
            .await
            .unwrap();
        store.set_tools("alpha", vec![tool]).await.unwrap();
        let state = store.get_server_state("alpha").await.unwrap();
        assert_eq!(state.status.tools.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_connected_replaces_previous_client() {
        let store = store();
        let first = session("alpha");
        let second = session("alpha");

        store
            .mark_connected("alpha", first.clone(), vec![])
            .await
            .unwrap();
        store
            .mark_connected("alpha", second.clone(), vec![])
            .await
            .unwrap();

        let state = store.get_server_state("alpha").await.unwrap();
        assert!(Arc::ptr_eq(state.client.as_ref().unwrap(), &second));
    }
}
