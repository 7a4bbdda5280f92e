//! Request types sent from the UI context to the background engine.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent across the UI/background boundary.
///
/// The `id` correlates the eventual [`crate::RpcResponse`]; payloads
/// are tagged so the background side can dispatch on `type` without
/// inspecting the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Correlation id, chosen by the sender.
    pub id: u64,
    #[serde(flatten)]
    pub payload: RpcRequestPayload,
}

impl RpcRequest {
    /// Create a request with the given correlation id.
    pub fn new(id: u64, payload: RpcRequestPayload) -> Self {
        Self { id, payload }
    }
}

/// Requests the background engine handles.
///
/// These map to the dispatch table in the background context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequestPayload {
    /// List every tool currently available from connected MCP servers.
    McpToolsList,

    /// Call a tool on a specific MCP server.
    McpToolCall {
        server_id: String,
        name: String,
        #[serde(default)]
        arguments: Value,
    },

    /// Query the connection status of one server.
    McpServerStatus { server_id: String },

    /// Run an on-demand health check against one server.
    McpHealthCheck { server_id: String },

    /// List tools registered by page-injected sources.
    WebToolsList,

    /// Call a page-injected tool.
    WebToolCall {
        name: String,
        #[serde(default)]
        arguments: Value,
    },
}
