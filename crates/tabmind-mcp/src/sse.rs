//! Legacy HTTP+SSE transport.
//!
//! The older MCP transport splits the wire in two: a long-lived GET
//! event-source carries everything the server says (the first event
//! names the POST endpoint, later `message` events carry correlated
//! responses and server notifications), while outbound messages are
//! POSTed to the discovered endpoint. A background read loop routes
//! inbound responses to waiting callers by message id.

use crate::error::{McpError, McpResult};
use crate::protocol::{InboundMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::{Transport, TransportEvents};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

/// One parsed server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream does not name one.
    pub name: String,
    /// Joined data lines.
    pub data: String,
}

/// Incremental SSE frame parser.
///
/// Fed raw bytes as they arrive; yields complete events. Carriage
/// returns are dropped so CRLF and LF framing both parse.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: String,
    events: VecDeque<SseEvent>,
}

impl SseParser {
    /// Create an empty parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes from the wire.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf
            .push_str(&String::from_utf8_lossy(bytes).replace('\r', ""));

        while let Some(idx) = self.buf.find("\n\n") {
            let raw: String = self.buf.drain(..idx + 2).collect();
            if let Some(event) = Self::parse_block(raw.trim_end_matches('\n')) {
                self.events.push_back(event);
            }
        }
    }

    /// Pop the next complete event, if any.
    pub fn next_event(&mut self) -> Option<SseEvent> {
        self.events.pop_front()
    }

    fn parse_block(block: &str) -> Option<SseEvent> {
        let mut name = "message".to_string();
        let mut data_lines = Vec::new();

        for line in block.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            match field {
                "event" => name = value.to_string(),
                "data" => data_lines.push(value.to_string()),
                // id and retry are not used by this client
                _ => {}
            }
        }

        if data_lines.is_empty() {
            return None;
        }
        Some(SseEvent {
            name,
            data: data_lines.join("\n"),
        })
    }
}

/// Legacy SSE transport configuration.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// The server's SSE URL.
    pub url: String,
    /// Optional bearer token.
    pub auth_token: Option<String>,
    /// How long to wait for a correlated response.
    pub request_timeout: Duration,
    /// How long to wait for the endpoint event at connect time.
    pub connect_timeout: Duration,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            request_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Legacy HTTP+SSE transport.
pub struct LegacySseTransport {
    config: SseConfig,
    client: Client,
    /// POST endpoint discovered from the stream's first event.
    endpoint: Url,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl LegacySseTransport {
    /// Open the event stream and discover the POST endpoint.
    ///
    /// Fails with the same taxonomy as the streamable probe: auth
    /// rejections map to auth errors, everything else to a connection
    /// failure.
    pub async fn connect(config: SseConfig, events: TransportEvents) -> McpResult<Self> {
        // No global client timeout: the GET stream must outlive any
        // single request.
        let client = Client::builder().build().map_err(|e| {
            McpError::connection_failed(format!("Failed to create HTTP client: {e}"))
        })?;

        let base = Url::parse(&config.url)
            .map_err(|e| McpError::Config(format!("Invalid server URL: {e}")))?;

        let mut req = client
            .get(&config.url)
            .header("Accept", "text/event-stream");
        if let Some(ref token) = config.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        let response = req.send().await.map_err(|e| {
            if e.is_connect() {
                McpError::connection_failed(format!("Connection failed: {e}"))
            } else {
                McpError::connection_failed(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(McpError::AuthRequired);
        }
        if status == StatusCode::FORBIDDEN {
            return Err(McpError::AuthFailed(status.to_string()));
        }
        if !status.is_success() {
            return Err(McpError::connection_failed(format!(
                "SSE endpoint returned {status}"
            )));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !content_type.contains("text/event-stream") {
            return Err(McpError::connection_failed(format!(
                "Expected event stream, got '{content_type}'"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut parser = SseParser::new();

        // The first event on the stream names the POST endpoint
        let endpoint_path = tokio::time::timeout(config.connect_timeout, async {
            while let Some(chunk) = stream.next().await {
                let chunk =
                    chunk.map_err(|e| McpError::connection_failed(format!("Stream error: {e}")))?;
                parser.push(&chunk);
                while let Some(event) = parser.next_event() {
                    if event.name == "endpoint" {
                        return Ok(event.data);
                    }
                    debug!(event = %event.name, "Ignoring pre-endpoint event");
                }
            }
            Err(McpError::connection_failed(
                "Stream closed before endpoint event",
            ))
        })
        .await
        .map_err(|_| McpError::Timeout)??;

        let endpoint = base
            .join(&endpoint_path)
            .map_err(|e| McpError::protocol(format!("Invalid endpoint '{endpoint_path}': {e}")))?;

        debug!(endpoint = %endpoint, "Discovered SSE message endpoint");

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();

        tokio::spawn(read_loop(
            stream,
            parser,
            pending.clone(),
            connected.clone(),
            cancel.clone(),
            events,
        ));

        Ok(Self {
            config,
            client,
            endpoint,
            pending,
            connected,
            cancel,
        })
    }

    /// Build a POST to the discovered endpoint.
    fn build_post(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .header("Content-Type", "application/json")
            .timeout(self.config.request_timeout)
            .body(body);

        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }

        req
    }
}

/// Forward inbound stream frames until the stream ends or the
/// transport is closed.
async fn read_loop<S, B, E>(
    mut stream: S,
    mut parser: SseParser,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
    cancel: CancellationToken,
    events: TransportEvents,
) where
    S: futures::Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            chunk = stream.next() => match chunk {
                Some(Ok(bytes)) => {
                    parser.push(bytes.as_ref());
                    while let Some(event) = parser.next_event() {
                        dispatch_event(event, &pending, &events);
                    }
                }
                Some(Err(e)) => break Some(format!("Event stream error: {e}")),
                None => break Some("Event stream closed by server".to_string()),
            }
        }
    };

    connected.store(false, Ordering::SeqCst);

    // Wake every waiter; dropping the senders surfaces as a closed
    // connection on their side.
    if let Ok(mut guard) = pending.lock() {
        guard.clear();
    }

    if let Some(reason) = reason {
        warn!(reason = %reason, "SSE transport dropped");
        if let Some(ref cb) = events.on_disconnect {
            cb(reason);
        }
    }
}

fn dispatch_event(event: SseEvent, pending: &PendingMap, events: &TransportEvents) {
    if event.name != "message" {
        debug!(event = %event.name, "Ignoring unknown event type");
        return;
    }

    match InboundMessage::parse(&event.data) {
        Some(InboundMessage::Response(response)) => {
            let sender = pending
                .lock()
                .ok()
                .and_then(|mut guard| guard.remove(&response.id));
            match sender {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => warn!(id = response.id, "Uncorrelated response dropped"),
            }
        }
        Some(InboundMessage::Notification(notification)) => {
            if let Some(ref cb) = events.on_notification {
                cb(notification);
            }
        }
        None => warn!("Unparseable message frame"),
    }
}

#[async_trait]
impl Transport for LegacySseTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        if !self.is_connected() {
            return Err(McpError::connection_failed("Transport is closed"));
        }

        let id = request.id;
        let body = serde_json::to_string(&request)?;

        debug!(id, method = %request.method, "Sending SSE request");

        let (tx, rx) = oneshot::channel();
        if let Ok(mut guard) = self.pending.lock() {
            guard.insert(id, tx);
        }

        let post_result = async {
            let response = self.build_post(body).send().await.map_err(|e| {
                if e.is_timeout() {
                    McpError::Timeout
                } else {
                    McpError::connection_failed(format!("POST failed: {e}"))
                }
            })?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                Err(McpError::AuthRequired)
            } else if !status.is_success() {
                Err(McpError::protocol(format!(
                    "Message endpoint returned {status}"
                )))
            } else {
                Ok(())
            }
        }
        .await;

        if let Err(e) = post_result {
            if let Ok(mut guard) = self.pending.lock() {
                guard.remove(&id);
            }
            return Err(e);
        }

        // The response arrives over the event stream, not the POST
        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(McpError::connection_failed(
                "Connection closed while awaiting response",
            )),
            Err(_) => {
                if let Ok(mut guard) = self.pending.lock() {
                    guard.remove(&id);
                }
                Err(McpError::Timeout)
            }
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> McpResult<()> {
        if !self.is_connected() {
            return Err(McpError::connection_failed("Transport is closed"));
        }

        let body = serde_json::to_string(&notification)?;

        debug!(method = %notification.method, "Sending SSE notification");

        let response = self
            .build_post(body)
            .send()
            .await
            .map_err(|e| McpError::protocol(format!("Notification failed: {e}")))?;

        if !response.status().is_success() {
            warn!(status = %response.status(), "Notification returned non-success status");
        }

        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.cancel.cancel();
        self.connected.store(false, Ordering::SeqCst);
        debug!("Closed SSE transport");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
