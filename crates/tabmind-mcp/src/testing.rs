//! In-crate test doubles.

use crate::error::{McpError, McpResult};
use crate::protocol::{JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::transport::Transport;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Scripted transport: canned results per method, call counting.
pub(crate) struct MockTransport {
    results: Mutex<HashMap<String, Value>>,
    errors: Mutex<HashMap<String, JsonRpcError>>,
    calls: Mutex<HashMap<String, usize>>,
    notifies: AtomicUsize,
    connected: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(HashMap::new()),
            errors: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            notifies: AtomicUsize::new(0),
            connected: AtomicBool::new(true),
        })
    }

    /// A transport scripted for the standard handshake plus the given
    /// tool catalog. `tools/call` answers with a single text item.
    pub(crate) fn with_tools(tools: Vec<Value>) -> Arc<Self> {
        let mock = Self::new();
        mock.on(
            "initialize",
            serde_json::json!({
                "protocolVersion": crate::protocol::PROTOCOL_VERSION,
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "mock"}
            }),
        );
        mock.on("tools/list", serde_json::json!({ "tools": tools }));
        mock.on(
            "tools/call",
            serde_json::json!({
                "content": [{"type": "text", "text": "ok"}],
                "isError": false
            }),
        );
        mock
    }

    /// Script a result for a method.
    pub(crate) fn on(&self, method: &str, result: Value) {
        self.results.lock().unwrap().insert(method.to_string(), result);
    }

    /// Script an error payload for a method.
    pub(crate) fn fail_method(&self, method: &str, code: i64, message: &str) {
        self.errors.lock().unwrap().insert(
            method.to_string(),
            JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            },
        );
    }

    /// How many requests were sent for a method.
    pub(crate) fn call_count(&self, method: &str) -> usize {
        *self.calls.lock().unwrap().get(method).unwrap_or(&0)
    }

    /// How many notifications were sent.
    pub(crate) fn notify_count(&self) -> usize {
        self.notifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn request(&self, request: JsonRpcRequest) -> McpResult<JsonRpcResponse> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.method.clone())
            .or_insert(0) += 1;

        if let Some(error) = self.errors.lock().unwrap().get(&request.method) {
            return Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: None,
                error: Some(error.clone()),
            });
        }

        match self.results.lock().unwrap().get(&request.method) {
            Some(result) => Ok(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id: request.id,
                result: Some(result.clone()),
                error: None,
            }),
            None => Err(McpError::connection_failed(format!(
                "No scripted result for '{}'",
                request.method
            ))),
        }
    }

    async fn notify(&self, _notification: JsonRpcNotification) -> McpResult<()> {
        self.notifies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> McpResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
