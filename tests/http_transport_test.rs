//! HTTP Transport Tests
//!
//! A real listener on an ephemeral port, driven by `HttpTransport` and by
//! raw requests.

mod helpers;

use {
    helpers::{fast_client_config, init_test_tracing, test_server},
    mcpmesh::{
        health::HealthStatus,
        limits::ResourceLimits,
        transport::{HttpTransport, Transport},
        HttpHandle, McpClient, McpServer, McpServerBuilder,
    },
    serde_json::{json, Value},
    std::{sync::Arc, time::Duration},
};

async fn listening() -> (McpServer, helpers::Counters, HttpHandle) {
    init_test_tracing();
    let (server, counters) = test_server("http-test");
    let handle = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, counters, handle)
}

#[tokio::test]
async fn test_client_over_http() {
    let (server, counters, handle) = listening().await;
    let transport = Arc::new(HttpTransport::new(&handle.http_url(), Duration::from_secs(5)).unwrap());
    let client = McpClient::connect(transport.clone() as Arc<dyn Transport>, fast_client_config())
        .await
        .unwrap();

    let session_id = transport.session_id().await;
    assert!(session_id.is_some());
    assert_eq!(server.session_count(), 1);

    let result = client.call_tool("echo", json!({"text": "over http"})).await.unwrap();
    assert_eq!(result.value(), json!({"text": "over http"}));
    assert_eq!(counters.echo_calls(), 1);

    let contents = client.read_resource("file://notes.txt").await.unwrap();
    assert_eq!(contents.text, "first draft");

    client.close().await;
    server.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

/// Requests without a session header run in a throwaway session
#[tokio::test]
async fn test_sessionless_request() {
    let (server, _counters, handle) = listening().await;
    let http = reqwest::Client::new();

    let response = http
        .post(handle.http_url())
        .json(&json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("mcp-session-id").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["id"], 7);
    assert_eq!(body["result"]["tools"].as_array().unwrap().len(), 2);
    assert_eq!(server.session_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let (server, _counters, handle) = listening().await;
    let http = reqwest::Client::new();

    let response = http
        .post(handle.http_url())
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-06-18",
                "capabilities": {},
                "clientInfo": {"name": "raw", "version": "0.0.1"}
            }
        }))
        .send()
        .await
        .unwrap();
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .unwrap();
    assert_eq!(server.session_count(), 1);

    // Notifications are accepted without a body
    let response = http
        .post(handle.http_url())
        .header("mcp-session-id", &session_id)
        .json(&json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 202);

    let response = http
        .delete(handle.http_url())
        .header("mcp-session-id", &session_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);
    assert_eq!(server.session_count(), 0);

    // The session is gone
    let response = http
        .post(handle.http_url())
        .header("mcp-session-id", &session_id)
        .json(&json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32600);

    server.shutdown().await.unwrap();
}

/// A failed initialize does not leave a session behind
#[tokio::test]
async fn test_failed_initialize_opens_no_session() {
    let (server, _counters, handle) = listening().await;
    let response = reqwest::Client::new()
        .post(handle.http_url())
        .json(&json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": "bogus"}))
        .send()
        .await
        .unwrap();
    assert!(response.headers().get("mcp-session-id").is_none());
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32602);
    assert_eq!(server.session_count(), 0);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_endpoint() {
    let (server, _counters, handle) = listening().await;
    let url = format!("http://{}/health", handle.local_addr());
    let status: HealthStatus = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert!(status.is_healthy());
    assert_eq!(status.session_count, 0);

    server.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_server_is_transient() {
    init_test_tracing();
    let transport = HttpTransport::new("http://127.0.0.1:1/mcp", Duration::from_millis(500)).unwrap();
    let err = McpClient::connect(Arc::new(transport), fast_client_config())
        .await
        .err()
        .unwrap();
    assert!(err.is_transient());
}

/// Bodies over the message size limit are refused before dispatch
#[tokio::test]
async fn test_oversized_body_rejected() {
    init_test_tracing();
    let server = McpServerBuilder::new("http-limits", "1.0.0")
        .with_limits(ResourceLimits {
            max_message_size: 1024,
            ..ResourceLimits::default()
        })
        .build()
        .unwrap();
    let handle = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let http = reqwest::Client::new();

    let oversized = json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "initialize",
        "params": {"protocolVersion": "2025-06-18", "padding": "x".repeat(4096)}
    });
    let response = http.post(handle.http_url()).json(&oversized).send().await.unwrap();
    assert_eq!(response.status(), 413);
    assert_eq!(server.session_count(), 0);

    let response = http
        .post(handle.http_url())
        .json(&json!({"jsonrpc": "2.0", "id": 10, "method": "ping"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.shutdown().await.unwrap();
}
