//! JSON-RPC 2.0 Compliance Tests
//!
//! Response shapes and error codes produced by a serving server.

#[cfg(test)]
mod tests {
    use super::super::{decode, echo_server, echo_server_builder, notification, request};
    use crate::{limits::ResourceLimits, McpServer};
    use serde_json::{json, Value};

    async fn serving() -> (McpServer, std::sync::Arc<crate::session::Session>) {
        let server = echo_server();
        server.start().unwrap();
        let session = server.open_session(None).unwrap();
        (server, session)
    }

    /// Every response carries the version, the request id and exactly one
    /// of result or error
    #[tokio::test]
    async fn test_response_format_compliance() {
        let (server, session) = serving().await;
        let response = decode(
            server
                .handle_message(
                    &session,
                    &request(12345, "initialize", json!({"protocolVersion": "2025-06-18"})),
                )
                .await,
        );

        assert_eq!(response["jsonrpc"], "2.0");
        assert_eq!(response["id"], 12345);
        assert!(response.get("result").is_some());
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_string_ids_are_echoed() {
        let (server, session) = serving().await;
        let raw = json!({"jsonrpc": "2.0", "id": "abc-1", "method": "unknown/method"}).to_string();
        let response = decode(server.handle_message(&session, &raw).await);

        assert_eq!(response["id"], "abc-1");
        assert_eq!(response["error"]["code"], -32601);
        assert!(response["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn test_parse_error_has_null_id() {
        let (server, session) = serving().await;
        let response = decode(server.handle_message(&session, "{not json").await);

        assert_eq!(response["error"]["code"], -32700);
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_missing_version_is_invalid_request() {
        let (server, session) = serving().await;
        let raw = json!({"id": 3, "method": "ping"}).to_string();
        let response = decode(server.handle_message(&session, &raw).await);

        assert_eq!(response["error"]["code"], -32600);
        assert_eq!(response["id"], 3);
    }

    /// Notifications never produce a response, even when they fail
    #[tokio::test]
    async fn test_notifications_get_no_response() {
        let (server, session) = serving().await;
        assert!(server
            .handle_message(&session, &notification("notifications/initialized"))
            .await
            .is_none());
        assert!(server
            .handle_message(&session, &notification("notifications/unknown"))
            .await
            .is_none());
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn test_responses_sent_to_server_are_ignored() {
        let (server, session) = serving().await;
        let raw = json!({"jsonrpc": "2.0", "id": 9, "result": {}}).to_string();
        assert!(server.handle_message(&session, &raw).await.is_none());
    }

    #[tokio::test]
    async fn test_oversized_message_is_capacity_exceeded() {
        let server = echo_server_builder()
            .with_limits(ResourceLimits {
                max_message_size: 64,
                ..ResourceLimits::default()
            })
            .build()
            .unwrap();
        server.start().unwrap();
        let session = server.open_session(None).unwrap();

        let big = request(1, "tools/call", json!({"name": "echo", "arguments": {"text": "x".repeat(200)}}));
        let response = decode(server.handle_message(&session, &big).await);
        assert_eq!(response["error"]["code"], -32000);
    }

    /// Schema failures are rejected before execution with the violations
    /// attached
    #[tokio::test]
    async fn test_invalid_tool_arguments() {
        let (server, session) = serving().await;
        let response = decode(
            server
                .handle_message(
                    &session,
                    &request(4, "tools/call", json!({"name": "echo", "arguments": {"text": 5}})),
                )
                .await,
        );

        assert_eq!(response["error"]["code"], -32602);
        assert!(response["error"]["data"]["violations"].is_array());
        assert!(server.tools().history("echo").is_empty());
    }

    #[tokio::test]
    async fn test_missing_resource_is_not_found() {
        let (server, session) = serving().await;
        let response = decode(
            server
                .handle_message(
                    &session,
                    &request(5, "resources/read", json!({"uri": "file://missing.txt"})),
                )
                .await,
        );

        assert!(response.get("result").is_none());
        assert_eq!(response["error"]["code"], -32602);
        assert_eq!(response["error"]["data"]["kind"], "not_found");
        assert_eq!(response["error"]["data"]["uri"], "file://missing.txt");
    }

    #[tokio::test]
    async fn test_successful_tool_call_shape() {
        let (server, session) = serving().await;
        let response = decode(
            server
                .handle_message(
                    &session,
                    &request(6, "tools/call", json!({"name": "echo", "arguments": {"text": "hi"}})),
                )
                .await,
        );

        let result = &response["result"];
        assert_eq!(result["structuredContent"], json!({"text": "hi"}));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["isError"], false);
        assert_eq!(server.tools().history("echo").len(), 1);
    }
}
