//! Background-side request dispatch.
//!
//! The UI cannot hold client references; it reaches live connections
//! only through serialized [`RpcRequest`] messages. This router is
//! the background half of that RPC: a dispatch table keyed by request
//! type, with every result wrapped in the response envelope.

use crate::health::HealthChecker;
use crate::proxy::ToolProxy;
use crate::store::ServerStateStore;
use crate::web::WebToolRegistry;
use serde_json::json;
use std::sync::Arc;
use tabmind_protocol::{Outcome, RpcRequest, RpcRequestPayload, RpcResponse};
use tracing::debug;

/// Routes UI requests to the proxy, registry, store, and checker.
pub struct BackgroundRouter {
    store: Arc<ServerStateStore>,
    proxy: Arc<ToolProxy>,
    web: Arc<WebToolRegistry>,
    health: Arc<HealthChecker>,
}

impl BackgroundRouter {
    /// Create a router over the background components.
    pub fn new(
        store: Arc<ServerStateStore>,
        proxy: Arc<ToolProxy>,
        web: Arc<WebToolRegistry>,
        health: Arc<HealthChecker>,
    ) -> Self {
        Self {
            store,
            proxy,
            web,
            health,
        }
    }

    /// Handle one request, always producing a correlated response.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        debug!(id = request.id, "Dispatching request");

        let outcome = match request.payload {
            RpcRequestPayload::McpToolsList => {
                let tools = self.proxy.all_tools().await;
                Outcome::ok(json!({ "tools": tools }))
            }

            RpcRequestPayload::McpToolCall {
                server_id,
                name,
                arguments,
            } => {
                self.proxy
                    .call_server_tool(&server_id, &name, arguments)
                    .await
            }

            RpcRequestPayload::McpServerStatus { server_id } => {
                match self.store.get_server_state(&server_id).await {
                    Some(state) => Outcome::ok(json!({
                        "serverId": state.config.id,
                        "name": state.config.name,
                        "isEnabled": state.is_enabled,
                        "status": state.status,
                    })),
                    None => Outcome::err(format!("Server not found: {server_id}")),
                }
            }

            RpcRequestPayload::McpHealthCheck { server_id } => {
                match self.health.perform_health_check(&server_id).await {
                    Ok(report) => match serde_json::to_value(&report) {
                        Ok(value) => Outcome::ok(value),
                        Err(e) => Outcome::err(e.to_string()),
                    },
                    Err(e) => Outcome::err(e.to_string()),
                }
            }

            RpcRequestPayload::WebToolsList => {
                let tools = self.web.list().await;
                Outcome::ok(json!({ "tools": tools }))
            }

            RpcRequestPayload::WebToolCall { name, arguments } => {
                self.web.call(&name, arguments).await
            }
        };

        RpcResponse {
            id: request.id,
            outcome,
        }
    }
}

impl std::fmt::Debug for BackgroundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundRouter").finish()
    }
}
