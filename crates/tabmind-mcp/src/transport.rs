//! MCP transport abstraction.
//!
//! Connect-time negotiation picks one of two wire mechanisms; the
//! chosen transport is carried as a tagged [`ActiveTransport`] so the
//! rest of the client code is transport-agnostic once a connection
//! exists.

use crate::error::McpResult;
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::sse::LegacySseTransport;
use crate::streamable::StreamableTransport;
use async_trait::async_trait;
use std::sync::Arc;

/// Transport trait for MCP communication.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the correlated response.
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse>;

    /// Send a notification (no response expected).
    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()>;

    /// Close the transport. Idempotent.
    async fn close(&self) -> McpResult<()>;

    /// Check if the transport is connected.
    fn is_connected(&self) -> bool;
}

/// Which wire mechanism a connection ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Single endpoint, POST per message, inline or SSE responses.
    Streamable,
    /// Separate GET event stream plus POST message endpoint.
    LegacySse,
}

/// Callbacks fired from a transport's read loop.
///
/// These run on the transport's task, at arbitrary times relative to
/// anything the owner is doing; owners must treat them as
/// asynchronous notifications.
#[derive(Clone, Default)]
pub struct TransportEvents {
    /// The connection dropped without a local `close()`.
    pub on_disconnect: Option<Arc<dyn Fn(String) + Send + Sync>>,
    /// A server-initiated notification arrived.
    pub on_notification: Option<Arc<dyn Fn(JsonRpcNotification) + Send + Sync>>,
}

impl std::fmt::Debug for TransportEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_notification", &self.on_notification.is_some())
            .finish()
    }
}

/// The transport selected at connect time.
pub enum ActiveTransport {
    Streamable(StreamableTransport),
    LegacySse(LegacySseTransport),
}

impl ActiveTransport {
    /// Which mechanism was negotiated.
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Streamable(_) => TransportKind::Streamable,
            Self::LegacySse(_) => TransportKind::LegacySse,
        }
    }
}

#[async_trait]
impl Transport for ActiveTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        match self {
            Self::Streamable(t) => t.request(request).await,
            Self::LegacySse(t) => t.request(request).await,
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        match self {
            Self::Streamable(t) => t.notify(notification).await,
            Self::LegacySse(t) => t.notify(notification).await,
        }
    }

    async fn close(&self) -> McpResult<()> {
        match self {
            Self::Streamable(t) => t.close().await,
            Self::LegacySse(t) => t.close().await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Streamable(t) => t.is_connected(),
            Self::LegacySse(t) => t.is_connected(),
        }
    }
}
