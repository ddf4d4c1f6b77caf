//! WebSocket Transport Tests
//!
//! Duplex connections: multiplexed calls, pushed notifications,
//! subscriptions through a proxy factory and resilient reconnects.

mod helpers;

use {
    helpers::{eventually, fast_client_config, init_test_tracing, test_server, Relay},
    futures_util::{SinkExt, StreamExt},
    mcpmesh::{
        config::{ProxyConfig, RetryPolicy},
        protocol::{fn_handler, types::ToolSpec, McpMethod},
        transport::{Transport, WebSocketTransport},
        HttpHandle, McpClient, McpError, McpProxyFactory, McpServer, McpServerBuilder,
    },
    serde_json::{json, Value},
    std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio_tungstenite::{connect_async, tungstenite::Message},
};

async fn listening() -> (McpServer, helpers::Counters, HttpHandle) {
    init_test_tracing();
    let (server, counters) = test_server("ws-test");
    let handle = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    (server, counters, handle)
}

#[tokio::test]
async fn test_raw_websocket_initialize() {
    let (server, _counters, handle) = listening().await;
    let (socket, _) = connect_async(handle.ws_url()).await.unwrap();
    let (mut write, mut read) = socket.split();

    let init = json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": {"name": "ws-raw", "version": "1.0.0"}
        }
    });
    write.send(Message::Text(init.to_string().into())).await.unwrap();

    let Some(Ok(Message::Text(text))) = read.next().await else {
        panic!("expected a text frame");
    };
    let response: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(response["id"], 1);
    assert_eq!(response["result"]["serverInfo"]["name"], "ws-test");
    assert_eq!(server.session_count(), 1);

    server.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

/// Calls share one socket and are matched by id
#[tokio::test]
async fn test_multiplexed_calls() {
    let (server, counters, handle) = listening().await;
    let transport = WebSocketTransport::connect(&handle.ws_url()).await.unwrap();
    let client = Arc::new(
        McpClient::connect(Arc::new(transport), fast_client_config())
            .await
            .unwrap(),
    );

    let calls: Vec<_> = (0..16)
        .map(|i| {
            let client = client.clone();
            tokio::spawn(async move { client.call_tool("echo", json!({"text": format!("ws{i}")})).await })
        })
        .collect();
    for (i, call) in calls.into_iter().enumerate() {
        let result = call.await.unwrap().unwrap();
        assert_eq!(result.value()["text"], format!("ws{i}"));
    }
    assert_eq!(counters.echo_calls(), 16);

    client.close().await;
    tokio::time::timeout(Duration::from_secs(2), async {
        while server.session_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    server.shutdown().await.unwrap();
}

/// A subscribed resource proxy sees updates pushed over the socket
#[tokio::test]
async fn test_resource_proxy_over_websocket() {
    let (server, _counters, handle) = listening().await;
    let address = handle.ws_url();
    let factory = McpProxyFactory::new(ProxyConfig {
        client: fast_client_config(),
        ..ProxyConfig::default()
    });
    let proxy = factory.create_resource_proxy(&address, "docs").await.unwrap();
    let mut notifications = factory.pool().get(&address).await.unwrap().notifications();

    proxy.subscribe("file://notes.txt").await.unwrap();
    assert_eq!(proxy.read("file://notes.txt").await.unwrap().text, "first draft");

    server.resources().update("file://notes.txt", "pushed").unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let note = notifications.recv().await.unwrap();
            if note.method == "notifications/resources/updated" {
                assert_eq!(note.params.unwrap()["uri"], "file://notes.txt");
                return;
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(proxy.read("file://notes.txt").await.unwrap().text, "pushed");

    factory.close().await;
    server.shutdown().await.unwrap();
    handle.join().await.unwrap();
}

/// Shutdown closes open sockets and the client notices
#[tokio::test]
async fn test_shutdown_closes_socket() {
    let (server, _counters, handle) = listening().await;
    let transport = WebSocketTransport::connect(&handle.ws_url()).await.unwrap();
    let client = McpClient::connect(Arc::new(transport), fast_client_config())
        .await
        .unwrap();

    server.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while !client.is_closed() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(client.ping().await.unwrap_err().is_transient());
}

/// A resilient client survives a dropped socket: the handshake and its
/// subscriptions are replayed on the new connection
#[tokio::test]
async fn test_resilient_reconnect_replays_session() {
    let (server, counters, handle) = listening().await;
    let relay = Relay::start(handle.local_addr()).await;
    let policy = RetryPolicy {
        max_retries: 10,
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(100),
        multiplier: 2.0,
        jitter: false,
    };
    let transport = WebSocketTransport::connect_resilient(&relay.ws_url(), policy)
        .await
        .unwrap();
    assert!(transport.is_resilient());
    let client = McpClient::connect(Arc::new(transport), fast_client_config())
        .await
        .unwrap();
    let mut notifications = client.notifications();
    client.subscribe("file://notes.txt").await.unwrap();
    assert_eq!(server.resources().subscriber_count("file://notes.txt"), 1);

    relay.cut();
    eventually("a second connection", || relay.accepted() >= 2).await;

    // The first socket is gone, so an update can only arrive through the
    // replayed subscription
    let delivered = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            server.resources().update("file://notes.txt", "after reconnect").unwrap();
            if let Ok(Ok(note)) =
                tokio::time::timeout(Duration::from_millis(50), notifications.recv()).await
            {
                if note.method == "notifications/resources/updated" {
                    return;
                }
            }
        }
    })
    .await;
    assert!(delivered.is_ok(), "no update after reconnect");

    assert!(!client.is_closed());
    let result = client.call_tool("echo", json!({"text": "still here"})).await.unwrap();
    assert_eq!(result.value(), json!({"text": "still here"}));
    assert_eq!(counters.echo_calls(), 1);
    eventually("the dropped session to close", || server.session_count() == 1).await;

    client.close().await;
    server.shutdown().await.unwrap();
}

/// A listing fetched across a list change is returned but not cached
#[tokio::test]
async fn test_listing_fetched_across_change_is_not_cached() {
    init_test_tracing();
    let lists = Arc::new(AtomicUsize::new(0));
    let server = {
        let lists = lists.clone();
        McpServerBuilder::new("ws-listing", "1.0.0")
            .with_handler(
                McpMethod::ToolsList,
                fn_handler(move |_params, _ctx| {
                    let lists = lists.clone();
                    async move {
                        lists.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok::<_, McpError>(json!({"tools": []}))
                    }
                }),
            )
            .build()
            .unwrap()
    };
    let handle = server.listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let transport = WebSocketTransport::connect(&handle.ws_url()).await.unwrap();
    let client = Arc::new(
        McpClient::connect(Arc::new(transport), fast_client_config())
            .await
            .unwrap(),
    );
    let mut notifications = client.notifications();

    let listing = {
        let client = client.clone();
        tokio::spawn(async move { client.list_tools().await })
    };
    eventually("the list call to reach the server", || lists.load(Ordering::SeqCst) == 1).await;

    server
        .tools()
        .register(
            ToolSpec::new("late", "Registered mid-listing", json!({"type": "object"})),
            Arc::new(|_args: Value| async move { Ok::<_, anyhow::Error>(Value::Null) }),
        )
        .unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let note = notifications.recv().await.unwrap();
            if note.method == "notifications/tools/list_changed" {
                return;
            }
        }
    })
    .await
    .unwrap();

    assert!(listing.await.unwrap().unwrap().is_empty());
    client.list_tools().await.unwrap();
    assert_eq!(lists.load(Ordering::SeqCst), 2);

    client.close().await;
    server.shutdown().await.unwrap();
}
