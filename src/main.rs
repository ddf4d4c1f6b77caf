//! MCP Server Example
//!
//! Serves an echo tool and a greeting prompt over HTTP and WebSocket on
//! port 3000 until interrupted.

use {
    anyhow::Result,
    mcpmesh::{
        handlers::PromptTemplate, logging, protocol::types::ToolSpec, McpServerBuilder,
    },
    serde_json::{json, Value},
    std::{net::SocketAddr, sync::Arc},
};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let server = McpServerBuilder::new("mcpmesh-server", env!("CARGO_PKG_VERSION"))
        .with_tool(
            ToolSpec::new(
                "echo",
                "Echo back the given text",
                json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                }),
            ),
            Arc::new(|args: Value| async move { Ok::<_, anyhow::Error>(json!({"text": args["text"]})) }),
        )
        .with_prompt(
            PromptTemplate::new("greet", "Say hello to {{who}}.")
                .with_description("Greets someone")
                .with_argument("who", true),
        )
        .build()?;

    let addr: SocketAddr = ([127, 0, 0, 1], 3000).into();
    let handle = server.listen(addr).await?;

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.shutdown().await;
        }
    });

    handle.join().await?;
    Ok(())
}
