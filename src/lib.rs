//! MCP (Model Context Protocol) for Rust
//!
//! JSON-RPC 2.0 dispatch with capability negotiation, pluggable transports
//! (stdio and child processes, HTTP, WebSocket), server feature handlers
//! for tools, resources, prompts and sampling, and a client with proxies
//! that cache, pool connections and fail over between servers.

pub mod capabilities;
pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod limits;
pub mod logging;
pub mod protocol;
pub mod proxy;
pub mod server;
pub mod session;
pub mod transport;
pub mod validation;

#[cfg(test)]
mod tests;

// Re-export key types
pub use {
    capabilities::{CapabilityGroup, CapabilitySet},
    client::{ClientStats, McpClient},
    config::{CacheConfig, ClientConfig, ManagerConfig, ProxyConfig, RetryPolicy, ServerConfig},
    error::{ClientError, ClientResult, ErrorCode, McpError, McpResult, RemoteError, TransportError},
    handlers::{PromptTemplate, ToolExecutor},
    limits::ResourceLimits,
    protocol::McpMethod,
    proxy::{McpPromptProxy, McpProxyFactory, McpProxyManager, McpResourceProxy, McpToolProxy},
    server::{HttpHandle, McpServer, McpServerBuilder, ServerState},
    transport::{Transport, TransportKind},
};
