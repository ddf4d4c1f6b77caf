//! Client-side proxies
//!
//! Proxies stand in for remote tools, resources and prompts. They share
//! pooled connections, cache what can be cached, and the manager spreads
//! calls over several equivalent servers.

pub mod cache;
pub mod connector;
pub mod factory;
pub mod manager;
pub mod pool;
pub mod prompt;
pub mod resource;
pub mod tool;

pub use {
    cache::{CacheStats, TtlLruCache},
    connector::{Connector, DefaultConnector},
    factory::McpProxyFactory,
    manager::McpProxyManager,
    pool::ConnectionPool,
    prompt::McpPromptProxy,
    resource::{McpResourceProxy, ResourceCacheKey},
    tool::{canonical_json, McpToolProxy, ToolCacheKey},
};
