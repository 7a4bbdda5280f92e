//! MCP server configuration and per-server state.

use crate::error::{McpError, McpResult};
use crate::protocol::McpTool;
use crate::session::McpSession;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tabmind_auth::{OAuthEndpoints, StoredTokens};

/// Static configuration for an MCP server.
///
/// Loaded once from extension configuration; immutable after load.
/// The user's enable toggle and tokens live in [`ServerState`], never
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Stable identifier, used as the storage namespace.
    pub id: String,

    /// Human-readable name shown in the server list.
    pub name: String,

    /// Base URL of the MCP endpoint.
    pub url: String,

    /// Whether the server requires an OAuth bearer token.
    #[serde(default)]
    pub requires_authentication: bool,

    /// OAuth endpoints, present when authentication is required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthEndpoints>,
}

impl ServerConfig {
    /// Create a config for an unauthenticated server.
    pub fn open(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            requires_authentication: false,
            oauth: None,
        }
    }

    /// Attach OAuth endpoints, marking the server as authenticated.
    pub fn with_oauth(mut self, oauth: OAuthEndpoints) -> Self {
        self.requires_authentication = true;
        self.oauth = Some(oauth);
        self
    }

    /// Storage key prefix for this server's persisted entries.
    pub fn storage_prefix(&self) -> String {
        format!("mcp.{}.", self.id)
    }

    /// Validate that the config is usable.
    pub fn validate(&self) -> McpResult<()> {
        if self.url.trim().is_empty() {
            return Err(McpError::Config(format!("Server '{}' has no URL", self.id)));
        }
        if self.requires_authentication && self.oauth.is_none() {
            return Err(McpError::Config(format!(
                "Server '{}' requires authentication but has no OAuth endpoints",
                self.id
            )));
        }
        Ok(())
    }
}

/// Load the configured server list from a JSON file.
pub fn load_server_configs(path: &Path) -> McpResult<Vec<ServerConfig>> {
    let content = std::fs::read_to_string(path)?;
    let configs: Vec<ServerConfig> = serde_json::from_str(&content)?;
    for config in &configs {
        config.validate()?;
    }
    Ok(configs)
}

/// Connection lifecycle state for one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected, initialized, tools listed.
    Connected,
    /// Last attempt failed; backoff may be pending.
    Error,
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Disconnected
    }
}

/// Connection status snapshot for one server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerStatus {
    pub state: ConnectionState,
    /// Tool catalog from the last successful listing.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<McpTool>,
    /// Human-readable failure reason when `state` is `Error`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runtime state for one configured server.
///
/// Entries are created at startup and never deleted during a session;
/// only the mutable fields change. `client` is `Some` exactly when
/// `status.state` is [`ConnectionState::Connected`].
#[derive(Clone)]
pub struct ServerState {
    /// Static configuration.
    pub config: Arc<ServerConfig>,
    /// User toggle; drives whether a live connection should exist.
    pub is_enabled: bool,
    /// Tokens currently in use, if the server is authenticated.
    pub tokens: Option<StoredTokens>,
    /// Live session, present only while connected.
    pub client: Option<Arc<McpSession>>,
    /// Connection status.
    pub status: ServerStatus,
}

impl ServerState {
    /// Create a fresh disconnected entry for a config.
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            is_enabled: false,
            tokens: None,
            client: None,
            status: ServerStatus::default(),
        }
    }

    /// Check the client/status consistency invariant.
    pub fn invariant_holds(&self) -> bool {
        self.client.is_some() == (self.status.state == ConnectionState::Connected)
    }
}

impl std::fmt::Debug for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerState")
            .field("id", &self.config.id)
            .field("is_enabled", &self.is_enabled)
            .field("state", &self.status.state)
            .field("has_client", &self.client.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_config() {
        let config = ServerConfig::open("linear", "Linear", "https://mcp.linear.app/mcp");
        assert!(!config.requires_authentication);
        assert!(config.oauth.is_none());
        assert_eq!(config.storage_prefix(), "mcp.linear.");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_oauth_sets_flag() {
        let config = ServerConfig::open("linear", "Linear", "https://mcp.linear.app/mcp")
            .with_oauth(OAuthEndpoints {
                register_url: "https://a/register".to_string(),
                auth_url: "https://a/authorize".to_string(),
                token_url: "https://a/token".to_string(),
                introspect_url: None,
                resource: None,
            });
        assert!(config.requires_authentication);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_missing_url() {
        let config = ServerConfig::open("x", "X", "");
        assert!(matches!(config.validate(), Err(McpError::Config(_))));
    }

    #[test]
    fn test_validate_auth_without_endpoints() {
        let mut config = ServerConfig::open("x", "X", "https://example.com");
        config.requires_authentication = true;
        assert!(matches!(config.validate(), Err(McpError::Config(_))));
    }

    #[test]
    fn test_config_deserialization() {
        let json = r#"{
            "id": "linear",
            "name": "Linear",
            "url": "https://mcp.linear.app/mcp",
            "requiresAuthentication": true,
            "oauth": {
                "registerUrl": "https://mcp.linear.app/register",
                "authUrl": "https://mcp.linear.app/authorize",
                "tokenUrl": "https://mcp.linear.app/token"
            }
        }"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert!(config.requires_authentication);
        assert_eq!(config.oauth.unwrap().token_url, "https://mcp.linear.app/token");
    }

    #[test]
    fn test_load_server_configs() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(
            &path,
            r#"[{"id": "a", "name": "A", "url": "https://a.example.com/mcp"}]"#,
        )
        .unwrap();

        let configs = load_server_configs(&path).unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].id, "a");
    }

    #[test]
    fn test_load_server_configs_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(&path, r#"[{"id": "a", "name": "A", "url": ""}]"#).unwrap();
        assert!(load_server_configs(&path).is_err());
    }

    #[test]
    fn test_fresh_state_invariant() {
        let state = ServerState::new(Arc::new(ServerConfig::open("a", "A", "https://a")));
        assert!(state.invariant_holds());
        assert_eq!(state.status.state, ConnectionState::Disconnected);
        assert!(!state.is_enabled);
    }
}
