//! Page-injected tool sources.
//!
//! Pages can inject their own tools into the assistant (the "webmcp"
//! surface). These never touch an MCP server: the registry holds the
//! declarations plus an executor that forwards calls back into the
//! page, and exposes the same list/call envelope as the MCP proxy so
//! the UI treats both sources uniformly.

use crate::error::{McpError, McpResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tabmind_protocol::Outcome;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A tool declared by a page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebTool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// Executes a page tool, typically by messaging the owning tab.
#[async_trait]
pub trait WebToolExecutor: Send + Sync {
    async fn execute(&self, tool: &str, arguments: Value) -> McpResult<Value>;
}

struct WebToolEntry {
    tool: WebTool,
    executor: Arc<dyn WebToolExecutor>,
}

/// Registry of page-injected tools.
#[derive(Default)]
pub struct WebToolRegistry {
    entries: RwLock<HashMap<String, WebToolEntry>>,
}

impl WebToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any previous registration with the
    /// same name.
    pub async fn register(&self, tool: WebTool, executor: Arc<dyn WebToolExecutor>) {
        let name = tool.name.clone();
        let previous = self
            .entries
            .write()
            .await
            .insert(name.clone(), WebToolEntry { tool, executor });
        if previous.is_some() {
            warn!(tool = %name, "Replacing existing web tool registration");
        } else {
            debug!(tool = %name, "Registered web tool");
        }
    }

    /// Remove a tool. Returns `true` if it existed.
    pub async fn unregister(&self, name: &str) -> bool {
        self.entries.write().await.remove(name).is_some()
    }

    /// Every registered tool declaration.
    pub async fn list(&self) -> Vec<WebTool> {
        self.entries
            .read()
            .await
            .values()
            .map(|e| e.tool.clone())
            .collect()
    }

    /// Execute a tool, wrapping the result in the uniform envelope.
    pub async fn call(&self, name: &str, arguments: Value) -> Outcome {
        let executor = {
            let entries = self.entries.read().await;
            match entries.get(name) {
                Some(entry) => entry.executor.clone(),
                None => return Outcome::err(McpError::ToolNotFound(name.to_string()).to_string()),
            }
        };

        match executor.execute(name, arguments).await {
            Ok(value) => Outcome::ok(value),
            Err(e) => Outcome::err(e.to_string()),
        }
    }
}

impl std::fmt::Debug for WebToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebToolRegistry").finish()
    }
}
