//! MCP error types.

use thiserror::Error;

/// Result type for MCP operations.
pub type McpResult<T> = Result<T, McpError>;

/// Errors that can occur during MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Server id is not in the configured server list.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// Tool not found on any connected server.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No live connection exists for the server.
    #[error("Not connected")]
    NotConnected,

    /// Server configuration is invalid (missing URL, bad endpoint).
    /// Fatal for that server; never retried automatically.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-level connection failure. Retried with backoff.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The endpoint does not speak the attempted transport.
    /// Drives the streamable-to-SSE fallback at connect time.
    #[error("Transport not supported: {0}")]
    TransportMismatch(String),

    /// Malformed handshake or response payload. Retried like a
    /// connection failure but logged distinctly since it may indicate
    /// a server-version incompatibility.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The MCP initialize handshake was rejected.
    #[error("Server initialization failed: {0}")]
    InitializationFailed(String),

    /// The remote tool returned an error payload. Does not tear down
    /// the connection.
    #[error("Tool execution failed: {0}")]
    ToolError(String),

    /// The server is reachable but advertises no tools, which makes
    /// it useless to the proxy.
    #[error("Server '{0}' advertises no tools")]
    NoTools(String),

    /// Operation exceeded its deadline.
    #[error("Server timeout")]
    Timeout,

    /// Authentication is required but no usable token exists.
    #[error("Authentication required")]
    AuthRequired,

    /// The server rejected our credentials.
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Auth subsystem error.
    #[error("Auth error: {0}")]
    Auth(#[from] tabmind_auth::AuthError),
}

impl McpError {
    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Create a tool error.
    pub fn tool_error(message: impl Into<String>) -> Self {
        Self::ToolError(message.into())
    }

    /// Whether this error means the user must re-authorize.
    ///
    /// Auth failures are terminal for the reconnect loop; spinning
    /// against a revoked token would never succeed.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::AuthFailed(_) | Self::Auth(_)
        )
    }

    /// Whether the reconnect loop should retry after this error.
    ///
    /// Configuration and auth errors are not transient; everything
    /// transport-shaped is.
    pub fn is_retryable(&self) -> bool {
        !self.is_auth() && !matches!(self, Self::Config(_) | Self::ServerNotFound(_))
    }
}
