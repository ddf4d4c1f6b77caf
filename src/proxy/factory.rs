//! Builds tool, resource and prompt proxies over one connection pool.

use {
    super::{
        cache::TtlLruCache,
        connector::{Connector, DefaultConnector},
        pool::ConnectionPool,
        prompt::McpPromptProxy,
        resource::{McpResourceProxy, ResourceCacheKey},
        tool::{McpToolProxy, ToolCacheKey},
    },
    crate::{
        config::ProxyConfig,
        error::ClientResult,
        protocol::types::{CallToolResult, ResourceContents},
    },
    std::sync::Arc,
    tracing::info,
};

type ToolCache = TtlLruCache<ToolCacheKey, CallToolResult>;
type ResourceCache = TtlLruCache<ResourceCacheKey, ResourceContents>;

/// Creates proxies over one shared [`ConnectionPool`].
///
/// With `share_caches` every proxy of a kind uses the factory's cache;
/// otherwise each proxy gets its own, sized from the same config.
pub struct McpProxyFactory {
    config: ProxyConfig,
    pool: Arc<ConnectionPool>,
    tool_cache: Arc<ToolCache>,
    resource_cache: Arc<ResourceCache>,
}

impl McpProxyFactory {
    pub fn new(config: ProxyConfig) -> Self {
        let connector = DefaultConnector::new(config.client.request_timeout);
        Self::with_connector(config, Arc::new(connector))
    }

    pub fn with_connector(config: ProxyConfig, connector: Arc<dyn Connector>) -> Self {
        let pool = Arc::new(ConnectionPool::new(
            connector,
            config.client.clone(),
            config.max_connections,
        ));
        Self {
            tool_cache: Arc::new(TtlLruCache::new(config.tool_cache)),
            resource_cache: Arc::new(TtlLruCache::new(config.resource_cache)),
            config,
            pool,
        }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Proxy for the tool `name` on `address`. Connects eagerly so a bad
    /// address fails here rather than on first use.
    pub async fn create_tool_proxy(&self, address: &str, name: &str) -> ClientResult<McpToolProxy> {
        self.pool.get(address).await?;
        let cache = if self.config.share_caches {
            self.tool_cache.clone()
        } else {
            Arc::new(TtlLruCache::new(self.config.tool_cache))
        };
        info!(address = %address, tool = %name, "Created tool proxy");
        Ok(McpToolProxy::new(address, name, self.pool.clone(), cache))
    }

    pub async fn create_resource_proxy(&self, address: &str, name: &str) -> ClientResult<McpResourceProxy> {
        self.pool.get(address).await?;
        let cache = if self.config.share_caches {
            self.resource_cache.clone()
        } else {
            Arc::new(TtlLruCache::new(self.config.resource_cache))
        };
        info!(address = %address, proxy = %name, "Created resource proxy");
        Ok(McpResourceProxy::new(address, name, self.pool.clone(), cache))
    }

    pub async fn create_prompt_proxy(&self, address: &str, name: &str) -> ClientResult<McpPromptProxy> {
        self.pool.get(address).await?;
        info!(address = %address, proxy = %name, "Created prompt proxy");
        Ok(McpPromptProxy::new(address, name, self.pool.clone()))
    }

    /// Release every pooled connection. Proxies created earlier reconnect
    /// on their next call.
    pub async fn close(&self) {
        self.pool.close_all().await;
        self.tool_cache.clear();
        self.resource_cache.clear();
    }
}
