//! Remote tool calls with a result cache.
//!
//! Results are keyed by server, tool name and the canonical form of the
//! arguments, so argument order never causes a miss. Only successful
//! results are cached.

use {
    super::{cache::TtlLruCache, pool::ConnectionPool},
    crate::{error::ClientResult, protocol::types::CallToolResult},
    serde_json::Value,
    std::{fmt::Write, sync::Arc},
    tracing::debug,
};

/// Result cache key. Arguments are stored in canonical form so that key
/// order in the caller's object does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolCacheKey {
    pub server: String,
    pub tool: String,
    pub arguments: String,
}

impl ToolCacheKey {
    pub fn new(server: &str, tool: &str, arguments: &Value) -> Self {
        Self {
            server: server.to_string(),
            tool: tool.to_string(),
            arguments: canonical_json(arguments),
        }
    }
}

/// JSON text with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(key.clone()));
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            let _ = write!(out, "{scalar}");
        }
    }
}

/// A remote tool called as if it were local, with results cached for the
/// configured TTL.
pub struct McpToolProxy {
    address: String,
    tool: String,
    pool: Arc<ConnectionPool>,
    cache: Arc<TtlLruCache<ToolCacheKey, CallToolResult>>,
}

impl McpToolProxy {
    pub(crate) fn new(
        address: &str,
        tool: &str,
        pool: Arc<ConnectionPool>,
        cache: Arc<TtlLruCache<ToolCacheKey, CallToolResult>>,
    ) -> Self {
        Self {
            address: address.to_string(),
            tool: tool.to_string(),
            pool,
            cache,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.tool
    }

    /// Run the tool. Identical arguments within the TTL are answered from
    /// the cache; failures are never cached and come back unchanged.
    pub async fn execute(&self, arguments: Value) -> ClientResult<CallToolResult> {
        let key = ToolCacheKey::new(&self.address, &self.tool, &arguments);
        if let Some(cached) = self.cache.get(&key) {
            debug!(tool = %self.tool, address = %self.address, "Tool result served from cache");
            return Ok(cached);
        }

        let client = self.pool.get(&self.address).await?;
        let result = client.call_tool(&self.tool, arguments).await?;
        if !result.is_error {
            self.cache.insert(key, result.clone());
        }
        Ok(result)
    }

    /// Drop every cached result for this tool.
    pub fn invalidate(&self) -> usize {
        self.cache
            .remove_where(|key| key.server == self.address && key.tool == self.tool)
    }
}
