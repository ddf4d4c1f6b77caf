//! Remote resources with a bounded content cache.
//!
//! Update notifications from the server evict the matching entry. They are
//! applied before every cache lookup and again after every fetch, and a
//! fetched version older than the newest notified one is returned but not
//! cached, so a read that raced with an update cannot re-populate stale
//! content.
//!
//! Subscriptions are tracked per proxy and re-issued when the pool hands
//! out a new connection for the address.

use {
    super::{cache::TtlLruCache, pool::ConnectionPool},
    crate::{
        client::McpClient,
        error::ClientResult,
        protocol::{
            types::{ResourceContents, ResourceDescriptor, ResourceUpdatedParams},
            McpMethod, Notification,
        },
    },
    parking_lot::Mutex,
    std::{
        collections::{HashMap, HashSet},
        sync::{Arc, Weak},
    },
    tokio::sync::broadcast::{self, error::TryRecvError},
    tracing::{debug, warn},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceCacheKey {
    pub server: String,
    pub uri: String,
}

impl ResourceCacheKey {
    pub fn new(server: &str, uri: &str) -> Self {
        Self {
            server: server.to_string(),
            uri: uri.to_string(),
        }
    }
}

/// Notification stream of the client currently in use.
struct Watch {
    client: Weak<McpClient>,
    notifications: broadcast::Receiver<Notification>,
}

pub struct McpResourceProxy {
    address: String,
    name: String,
    pool: Arc<ConnectionPool>,
    cache: Arc<TtlLruCache<ResourceCacheKey, ResourceContents>>,
    watch: Mutex<Option<Watch>>,
    /// Newest version announced per uri.
    notified: Mutex<HashMap<String, u64>>,
    subscribed: Mutex<HashSet<String>>,
}

impl McpResourceProxy {
    pub(crate) fn new(
        address: &str,
        name: &str,
        pool: Arc<ConnectionPool>,
        cache: Arc<TtlLruCache<ResourceCacheKey, ResourceContents>>,
    ) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            pool,
            cache,
            watch: Mutex::new(None),
            notified: Mutex::new(HashMap::new()),
            subscribed: Mutex::new(HashSet::new()),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn list(&self) -> ClientResult<Vec<ResourceDescriptor>> {
        let client = self.client().await?;
        client.list_resources().await
    }

    pub async fn read(&self, uri: &str) -> ClientResult<ResourceContents> {
        self.apply_notifications();
        let key = ResourceCacheKey::new(&self.address, uri);
        if let Some(cached) = self.cache.get(&key) {
            debug!(uri = %uri, proxy = %self.name, "Resource served from cache");
            return Ok(cached);
        }

        let client = self.client().await?;
        let contents = client.read_resource(uri).await?;

        self.apply_notifications();
        let newest = self.notified.lock().get(uri).copied().unwrap_or(0);
        if contents.version >= newest {
            self.cache.insert(key, contents.clone());
        } else {
            debug!(uri = %uri, version = contents.version, newest, "Not caching superseded content");
        }
        Ok(contents)
    }

    /// Ask the server for update notifications on `uri`. Needs a duplex
    /// connection.
    pub async fn subscribe(&self, uri: &str) -> ClientResult<()> {
        let client = self.client().await?;
        client.subscribe(uri).await?;
        self.subscribed.lock().insert(uri.to_string());
        // Content cached before the subscription may already be stale
        self.cache.remove(&ResourceCacheKey::new(&self.address, uri));
        Ok(())
    }

    pub async fn unsubscribe(&self, uri: &str) -> ClientResult<()> {
        let client = self.client().await?;
        client.unsubscribe(uri).await?;
        self.subscribed.lock().remove(uri);
        Ok(())
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscribed.lock().contains(uri)
    }

    /// Drop cached content for `uri`.
    pub fn invalidate(&self, uri: &str) -> bool {
        self.cache
            .remove(&ResourceCacheKey::new(&self.address, uri))
            .is_some()
    }

    /// Whether live content for `uri` is cached, after applying pending
    /// notifications.
    pub fn is_cached(&self, uri: &str) -> bool {
        self.apply_notifications();
        self.cache
            .contains_key(&ResourceCacheKey::new(&self.address, uri))
    }

    /// The pooled client. When the pool has replaced the connection,
    /// cached content is dropped and tracked subscriptions are re-issued on
    /// the new one.
    async fn client(&self) -> ClientResult<Arc<McpClient>> {
        let client = self.pool.get(&self.address).await?;
        let resubscribe: Vec<String> = {
            let mut watch = self.watch.lock();
            let current = watch
                .as_ref()
                .is_some_and(|w| w.client.as_ptr() == Arc::as_ptr(&client));
            if current {
                return Ok(client);
            }
            let replaced = watch.is_some();
            *watch = Some(Watch {
                client: Arc::downgrade(&client),
                notifications: client.notifications(),
            });
            if !replaced {
                return Ok(client);
            }
            debug!(address = %self.address, "Connection replaced, dropping cached resources");
            self.evict_server_entries();
            self.subscribed.lock().iter().cloned().collect()
        };

        for uri in resubscribe {
            match client.subscribe(&uri).await {
                Ok(()) => debug!(uri = %uri, proxy = %self.name, "Re-subscribed after reconnect"),
                Err(e) => {
                    warn!(uri = %uri, error = %e, "Could not re-subscribe after reconnect");
                    self.subscribed.lock().remove(&uri);
                }
            }
        }
        Ok(client)
    }

    fn evict_server_entries(&self) -> usize {
        self.cache.remove_where(|key| key.server == self.address)
    }

    /// Evict entries named by notifications received so far.
    fn apply_notifications(&self) {
        let mut watch = self.watch.lock();
        let Some(watch) = watch.as_mut() else {
            return;
        };
        loop {
            match watch.notifications.try_recv() {
                Ok(notification) => self.apply(&notification),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, address = %self.address, "Missed notifications, dropping cached resources");
                    self.evict_server_entries();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn apply(&self, notification: &Notification) {
        match notification.method.parse::<McpMethod>() {
            Ok(McpMethod::ResourceUpdated) => {
                let Some(params) = notification
                    .params
                    .clone()
                    .and_then(|p| serde_json::from_value::<ResourceUpdatedParams>(p).ok())
                else {
                    return;
                };
                {
                    let mut notified = self.notified.lock();
                    let newest = notified.entry(params.uri.clone()).or_insert(0);
                    *newest = (*newest).max(params.version);
                }
                if self.invalidate(&params.uri) {
                    debug!(uri = %params.uri, version = params.version, "Evicted updated resource");
                }
            }
            Ok(McpMethod::ResourcesListChanged) => {
                // Removed and re-added resources restart their versions
                self.notified.lock().clear();
                self.evict_server_entries();
            }
            _ => {}
        }
    }
}
