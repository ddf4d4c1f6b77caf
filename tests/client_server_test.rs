//! Client/Server Integration Tests
//!
//! A real `McpClient` talking to a real `McpServer` over an in-memory pipe.

mod helpers;

use {
    helpers::{fast_client_config, init_test_tracing, serve_in_memory, test_server},
    mcpmesh::{
        protocol::{types::ToolSpec, McpMethod},
        ClientError, McpClient,
    },
    serde_json::{json, Value},
    std::{sync::Arc, time::Duration},
    tokio_test::{assert_err, assert_ok},
};

async fn connected() -> (mcpmesh::McpServer, helpers::Counters, McpClient) {
    init_test_tracing();
    let (server, counters) = test_server("client-test");
    let client = McpClient::connect(serve_in_memory(&server), fast_client_config())
        .await
        .unwrap();
    (server, counters, client)
}

#[tokio::test]
async fn test_handshake_records_server() {
    let (_server, _counters, client) = connected().await;
    let info = client.server_info().unwrap();
    assert_eq!(info.name, "client-test");
    assert!(client.server_capabilities().tools.is_some());
    assert!(client.server_capabilities().sampling.is_none());
    assert_ok!(client.ping().await);
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let (_server, counters, client) = connected().await;
    let result = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
    assert_eq!(result.value(), json!({"text": "hi"}));
    assert!(!result.is_error);
    assert_eq!(counters.echo_calls(), 1);
}

/// Each failure category surfaces as its own variant with the remote code
#[tokio::test]
async fn test_error_categories() {
    let (_server, counters, client) = connected().await;

    let err = client.call_tool("echo", json!({"text": 1})).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(ref e) if e.code == -32602));
    assert_eq!(counters.echo_calls(), 0);

    let err = client.call_tool("fail", json!({})).await.unwrap_err();
    let ClientError::Execution(remote) = err else {
        panic!("expected an execution error");
    };
    assert_eq!(remote.code, -32603);
    assert_eq!(remote.data.as_ref().unwrap()["cause"], "backend unavailable");
    // Execution errors are not retried
    assert_eq!(counters.fail_calls(), 1);

    let err = client.call(McpMethod::SamplingCreateMessage, Some(json!({}))).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(ref e) if e.code == -32001));
}

#[tokio::test]
async fn test_missing_resource_is_not_found() {
    let (_server, _counters, client) = connected().await;
    let err = client.read_resource("file://missing.txt").await.unwrap_err();
    let remote = err.remote().unwrap();
    assert_eq!(remote.code, -32602);
    assert_eq!(remote.data.as_ref().unwrap()["kind"], "not_found");

    let contents = client.read_resource("file://notes.txt").await.unwrap();
    assert_eq!(contents.text, "first draft");
    assert_eq!(contents.mime_type.as_deref(), Some("text/plain"));
}

/// Listings are cached until the server announces a change
#[tokio::test]
async fn test_listing_cache_follows_list_changed() {
    let (server, _counters, client) = connected().await;
    let mut notifications = client.notifications();

    assert_eq!(client.list_tools().await.unwrap().len(), 2);
    let requests = client.stats().requests;
    assert_eq!(client.list_tools().await.unwrap().len(), 2);
    assert_eq!(client.stats().requests, requests);

    server
        .tools()
        .register(
            ToolSpec::new("late", "Registered while serving", json!({"type": "object"})),
            Arc::new(|_args: Value| async move { Ok::<_, anyhow::Error>(Value::Null) }),
        )
        .unwrap();
    let note = tokio::time::timeout(Duration::from_secs(2), notifications.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(note.method, "notifications/tools/list_changed");

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "late"));
    assert_eq!(client.stats().requests, requests + 1);
}

#[tokio::test]
async fn test_prompts_render_remotely() {
    let (_server, _counters, client) = connected().await;
    let prompts = client.list_prompts().await.unwrap();
    assert_eq!(prompts[0].name, "greet");

    let args = json!({"who": "Ada", "mood": "curious"}).as_object().cloned();
    let rendered = client.get_prompt("greet", args).await.unwrap();
    assert_eq!(
        rendered.messages[0].content.as_text(),
        "Hello Ada, you seem curious."
    );

    let err = client.get_prompt("greet", None).await.unwrap_err();
    assert!(matches!(err, ClientError::Validation(_)));
}

#[tokio::test]
async fn test_concurrent_calls_on_serial_transport() {
    let (_server, counters, client) = connected().await;
    let client = Arc::new(client);
    let calls: Vec<_> = (0..8)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.call_tool("echo", json!({"text": format!("m{i}")})).await })
        })
        .collect();
    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.value()["text"], format!("m{i}"));
    }
    assert_eq!(counters.echo_calls(), 8);
}

/// After the server goes away calls fail with a connection error
#[tokio::test]
async fn test_server_shutdown_surfaces_as_connection_error() {
    let (server, _counters, client) = connected().await;
    server.shutdown().await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let err = assert_err!(client.ping().await);
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (_server, _counters, client) = connected().await;
    client.close().await;
    client.close().await;
    assert!(client.is_closed());
    assert!(matches!(client.ping().await, Err(ClientError::Connection(_))));
}
