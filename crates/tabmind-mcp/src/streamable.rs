//! Streamable HTTP transport.
//!
//! The newer MCP transport: one endpoint accepts every message as an
//! HTTP POST and answers either with a direct JSON body or with a
//! short SSE stream carrying the correlated response. Servers assign
//! a session via the `mcp-session-id` header; once seen, the id is
//! echoed on every subsequent request.

use crate::error::{McpError, McpResult};
use crate::protocol::{InboundMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{Transport, TransportEvents};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Streamable transport configuration.
#[derive(Debug, Clone)]
pub struct StreamableConfig {
    /// The MCP endpoint URL.
    pub url: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for StreamableConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Streamable HTTP transport.
pub struct StreamableTransport {
    config: StreamableConfig,
    client: Client,
    connected: AtomicBool,
    /// Session id assigned by the server.
    session_id: RwLock<Option<String>>,
    events: TransportEvents,
}

impl StreamableTransport {
    /// Create a new streamable transport.
    pub fn new(config: StreamableConfig, events: TransportEvents) -> McpResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            client,
            connected: AtomicBool::new(false),
            session_id: RwLock::new(None),
            events,
        })
    }

    /// Detect whether the endpoint speaks this transport.
    ///
    /// Sends a JSON-RPC `ping`, the one request the protocol permits
    /// before initialization. A 2xx answer (even a JSON-RPC error
    /// body) proves the endpoint handles POSTed messages; a 4xx
    /// outside the auth/ratelimit family means the endpoint wants the
    /// legacy transport instead.
    pub async fn probe(&self, request_id: u64) -> McpResult<()> {
        let request = JsonRpcRequest::new(request_id, "ping", None);
        let body = serde_json::to_string(&request)?;

        let response = self
            .build_request(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        self.remember_session_id(&response);

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            Err(McpError::AuthRequired)
        } else if status == StatusCode::FORBIDDEN {
            Err(McpError::AuthFailed(status.to_string()))
        } else if status.is_success() {
            self.connected.store(true, Ordering::SeqCst);
            debug!(url = %self.config.url, "Streamable transport detected");
            Ok(())
        } else if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::TOO_MANY_REQUESTS {
            Err(McpError::connection_failed(status.to_string()))
        } else if status.is_client_error() {
            Err(McpError::TransportMismatch(status.to_string()))
        } else {
            Err(McpError::connection_failed(status.to_string()))
        }
    }

    /// Build a POST with the common headers.
    fn build_request(&self, body: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body.to_string());

        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        if let Some(id) = self.session_id.read().ok().and_then(|g| g.clone()) {
            req = req.header("mcp-session-id", id);
        }

        req
    }

    /// Cache the session id from a response, if the server sent one.
    fn remember_session_id(&self, response: &reqwest::Response) {
        if let Some(id) = response
            .headers()
            .get("mcp-session-id")
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut guard) = self.session_id.write() {
                *guard = Some(id.to_string());
            }
        }
    }

    /// Parse a POST response into the correlated JSON-RPC response.
    async fn parse_response(
        &self,
        response: reqwest::Response,
        request_id: u64,
    ) -> McpResult<JsonRpcResponse> {
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(McpError::AuthFailed(status.to_string()));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(McpError::protocol(format!("Server returned {status}: {text}")));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            self.parse_sse_body(response, request_id).await
        } else {
            let text = response
                .text()
                .await
                .map_err(|e| McpError::protocol(format!("Failed to read response: {e}")))?;

            serde_json::from_str(&text)
                .map_err(|e| McpError::protocol(format!("Invalid JSON response: {e}")))
        }
    }

    /// Scan an SSE response body for the message correlated to
    /// `request_id`, forwarding any server notifications seen on the
    /// way.
    async fn parse_sse_body(
        &self,
        response: reqwest::Response,
        request_id: u64,
    ) -> McpResult<JsonRpcResponse> {
        use futures::StreamExt;

        let mut stream = response.bytes_stream();
        let mut parser = crate::sse::SseParser::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| McpError::protocol(format!("Stream error: {e}")))?;
            parser.push(&chunk);

            while let Some(event) = parser.next_event() {
                if event.name != "message" {
                    continue;
                }
                match InboundMessage::parse(&event.data) {
                    Some(InboundMessage::Response(resp)) if resp.id == request_id => {
                        return Ok(resp);
                    }
                    Some(InboundMessage::Response(resp)) => {
                        debug!(id = resp.id, "Skipping uncorrelated response in stream");
                    }
                    Some(InboundMessage::Notification(n)) => {
                        if let Some(ref cb) = self.events.on_notification {
                            cb(n);
                        }
                    }
                    None => warn!("Unparseable SSE frame"),
                }
            }
        }

        Err(McpError::protocol("SSE stream ended without response"))
    }
}

/// Map a reqwest send error onto the MCP taxonomy.
fn classify_send_error(e: reqwest::Error) -> McpError {
    if e.is_timeout() {
        McpError::Timeout
    } else if e.is_connect() {
        McpError::connection_failed(format!("Connection failed: {e}"))
    } else {
        McpError::connection_failed(format!("Request failed: {e}"))
    }
}

#[async_trait]
impl Transport for StreamableTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        let body = serde_json::to_string(&request)?;

        debug!(id = request.id, method = %request.method, "Sending request");

        let response = self
            .build_request(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        self.remember_session_id(&response);
        self.parse_response(response, request.id).await
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        let body = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending notification");

        let response = self
            .build_request(&body)
            .send()
            .await
            .map_err(classify_send_error)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        // Best-effort session termination; servers may not support it
        let session_id = self.session_id.read().ok().and_then(|g| g.clone());
        if let Some(id) = session_id {
            let _ = self
                .client
                .delete(&self.config.url)
                .header("mcp-session-id", id)
                .send()
                .await;
        }

        debug!("Closed streamable transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
