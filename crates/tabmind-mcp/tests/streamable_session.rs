//! Session-level tests against a streamable HTTP mock server.

use serde_json::json;
use tabmind_mcp::{
    ConnectionState, McpError, McpSession, SessionCallbacks, SessionConfig, TransportKind,
};
use wiremock::matchers::{body_string_contains, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_streamable_server(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_string_contains("\"method\":\"ping\""))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {}})),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("\"method\":\"initialize\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 2,
            "result": {
                "protocolVersion": "2025-03-26",
                "capabilities": {"tools": {"listChanged": false}},
                "serverInfo": {"name": "streamable-fixture"}
            }
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("notifications/initialized"))
        .respond_with(ResponseTemplate::new(202))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("\"method\":\"tools/list\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 3,
            "result": {"tools": [{
                "name": "lookup",
                "inputSchema": {"type": "object"}
            }]}
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_string_contains("\"method\":\"tools/call\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 4,
            "result": {
                "content": [{"type": "text", "text": "found"}],
                "isError": false
            }
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_streamable_negotiation_and_cycle() {
    let server = MockServer::start().await;
    mount_streamable_server(&server).await;

    let session = McpSession::new(
        SessionConfig::new("fix", "Fixture", format!("{}/mcp", server.uri())),
        SessionCallbacks::default(),
    );

    session.connect().await.unwrap();
    assert_eq!(session.transport_kind(), Some(TransportKind::Streamable));
    assert_eq!(session.status().state, ConnectionState::Connected);

    session.initialize().await.unwrap();
    let tools = session.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let result = session.call_tool("lookup", json!({})).await.unwrap();
    assert!(!result.is_error);

    session.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_auth_rejection_does_not_fall_back() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let session = McpSession::new(
        SessionConfig::new("fix", "Fixture", format!("{}/mcp", server.uri())),
        SessionCallbacks::default(),
    );

    // A 401 is an auth failure, not a transport mismatch; no SSE GET
    // is attempted and the session lands in error
    let result = session.connect().await;
    assert!(matches!(result, Err(McpError::AuthRequired)));
    assert_eq!(session.status().state, ConnectionState::Error);

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.method.to_string() == "POST"));
}

#[tokio::test]
async fn test_both_transports_rejected() {
    let server = MockServer::start().await;
    // POST probe says "wrong transport", GET is equally unavailable
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let session = McpSession::new(
        SessionConfig::new("fix", "Fixture", format!("{}/mcp", server.uri())),
        SessionCallbacks::default(),
    );

    let result = session.connect().await;
    assert!(matches!(result, Err(McpError::ConnectionFailed(_))));
    assert_eq!(session.status().state, ConnectionState::Error);

    // Both strategies were actually tried
    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().any(|r| r.method.to_string() == "POST"));
    assert!(requests.iter().any(|r| r.method.to_string() == "GET"));
}
