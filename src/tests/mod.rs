//! MCP Server Tests
//!
//! Server-level behavior driven through `McpServer::handle_message` and
//! in-memory connections.

pub mod jsonrpc_compliance_tests;

use {
    crate::{
        handlers::PromptTemplate,
        protocol::types::{ResourceDescriptor, ToolSpec},
        McpServer, McpServerBuilder,
    },
    serde_json::{json, Value},
    std::sync::Arc,
};

/// Server with an `echo` tool, one resource and one prompt.
pub(crate) fn echo_server() -> McpServer {
    echo_server_builder().build().unwrap()
}

pub(crate) fn echo_server_builder() -> McpServerBuilder {
    McpServerBuilder::new("test-server", "1.0.0")
        .with_tool(
            ToolSpec::new(
                "echo",
                "Echo text",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            ),
            Arc::new(|args: Value| async move { Ok::<_, anyhow::Error>(json!({"text": args["text"]})) }),
        )
        .with_resource(
            ResourceDescriptor::new("file://notes.txt", "notes").with_mime_type("text/plain"),
            "hello",
        )
        .with_prompt(PromptTemplate::new("greet", "Hello {{who}}").with_argument("who", true))
}

pub(crate) fn request(id: i64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

pub(crate) fn notification(method: &str) -> String {
    json!({"jsonrpc": "2.0", "method": method}).to_string()
}

pub(crate) fn decode(reply: Option<String>) -> Value {
    serde_json::from_str(&reply.expect("expected a response")).unwrap()
}
