//! MCP connection management and tool proxying for tabmind.
//!
//! tabmind's background context keeps long-lived connections to
//! remote MCP servers and exposes their tools to the assistant. This
//! crate is that engine: everything between the UI's serialized
//! messages and the wire.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  RpcRequest   ┌──────────────────┐       ┌─────────────┐
//! │  side panel │──────────────▶│ BackgroundRouter │──────▶│  ToolProxy  │
//! │    (UI)     │◀──────────────│  (dispatch)      │       └──────┬──────┘
//! └────────────┘  RpcResponse  └──────────────────┘              │
//!                                                        ┌───────▼────────┐
//!                       ┌─────────────────┐              │ ServerStateStore│
//!                       │ ConnectionManager│─────────────▶│  (per server)  │
//!                       │  (reconnect loop)│              └───────┬────────┘
//!                       └────────┬────────┘                      │
//!                                │ owns                          │ client
//!                         ┌──────▼──────┐                 ┌──────▼──────┐
//!                         │  McpSession │ ──transport──▶  │ MCP servers │
//!                         └─────────────┘                 └─────────────┘
//! ```
//!
//! # Transports
//!
//! Each session negotiates its wire mechanism at connect time:
//! Streamable HTTP is tried first, with fallback to the legacy
//! HTTP+SSE pair when the endpoint rejects it. After negotiation the
//! rest of the crate only sees the [`Transport`] trait.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tabmind_auth::{AuthHelper, LocalStore};
//! use tabmind_mcp::{ConnectionManager, ServerConfig, ServerStateStore, ToolProxy};
//!
//! # async fn example() -> tabmind_mcp::McpResult<()> {
//! let store = Arc::new(ServerStateStore::new(vec![ServerConfig::open(
//!     "linear",
//!     "Linear",
//!     "https://mcp.linear.app/mcp",
//! )]));
//! let auth = AuthHelper::new(Arc::new(LocalStore::new()?));
//!
//! let manager = ConnectionManager::new(store.clone(), auth);
//! manager.enable_server("linear").await?;
//!
//! let proxy = ToolProxy::new(store);
//! let tools = proxy.all_tools().await;
//! let outcome = proxy
//!     .call_server_tool("linear", "create_issue", serde_json::json!({"title": "x"}))
//!     .await;
//! # Ok(())
//! # }
//! ```

pub mod backoff;
mod error;
pub mod health;
mod manager;
pub mod protocol;
mod proxy;
mod rpc;
pub mod schema;
mod server;
mod session;
pub mod sse;
mod store;
pub mod streamable;
mod transport;
mod web;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::Backoff;
pub use error::{McpError, McpResult};
pub use health::{HealthChecker, HealthReport, HEALTH_CHECK_TIMEOUT};
pub use manager::{ConnectionManager, ManagerConfig};
pub use protocol::{McpTool, ToolCallResult, ToolContent};
pub use proxy::{ProxyConfig, TaggedTool, ToolProxy};
pub use rpc::BackgroundRouter;
pub use schema::{ParamKind, ParamSpec, ToolParams};
pub use server::{
    load_server_configs, ConnectionState, ServerConfig, ServerState, ServerStatus,
};
pub use session::{McpSession, SessionCallbacks, SessionConfig};
pub use store::ServerStateStore;
pub use transport::{ActiveTransport, Transport, TransportEvents, TransportKind};
pub use web::{WebTool, WebToolExecutor, WebToolRegistry};
