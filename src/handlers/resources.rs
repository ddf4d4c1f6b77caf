//! Resource store and subscriptions.
//!
//! Content changes and their notifications happen under the same write
//! lock: a subscriber never sees a notification for a version that is not
//! yet readable, and notifications for one uri go out in version order.

use {
    super::ChangeFeed,
    crate::{
        error::{McpError, McpResult},
        limits::{check_capacity, ResourceLimits},
        protocol::{
            parse_params,
            types::{
                ListResourcesResult, ReadResourceResult, ResourceContents, ResourceDescriptor,
                ResourceUpdatedParams, ResourceUriParams,
            },
            McpMethod, MethodHandler, Notification,
        },
        session::{NotificationSink, RequestContext, SessionId},
    },
    async_trait::async_trait,
    parking_lot::RwLock,
    serde_json::{json, Value},
    std::collections::{BTreeMap, HashMap},
    tracing::{debug, info},
};

struct StoredResource {
    descriptor: ResourceDescriptor,
    text: String,
}

#[derive(Default)]
struct ResourceState {
    resources: BTreeMap<String, StoredResource>,
    subscriptions: HashMap<String, HashMap<SessionId, NotificationSink>>,
}

impl ResourceState {
    fn notify_updated(&mut self, uri: &str, version: u64) {
        let Some(subscribers) = self.subscriptions.get_mut(uri) else {
            return;
        };
        let params = serde_json::to_value(ResourceUpdatedParams {
            uri: uri.to_string(),
            version,
        })
        .ok();
        let notification = Notification::new(McpMethod::ResourceUpdated, params);
        subscribers.retain(|subscriber, sink| {
            let delivered = sink.send(&notification);
            if !delivered {
                debug!(uri = %uri, subscriber = %subscriber, "Dropping subscription for closed connection");
            }
            delivered
        });
        if subscribers.is_empty() {
            self.subscriptions.remove(uri);
        }
    }
}

pub struct ResourceHandler {
    state: RwLock<ResourceState>,
    max_resources: Option<usize>,
    changes: ChangeFeed,
}

impl ResourceHandler {
    pub fn new(limits: &ResourceLimits, changes: ChangeFeed) -> Self {
        Self {
            state: RwLock::new(ResourceState::default()),
            max_resources: limits.max_resources,
            changes,
        }
    }

    /// Add a resource. Registering an existing uri replaces its content
    /// and counts as an update.
    pub fn register(&self, descriptor: ResourceDescriptor, text: impl Into<String>) -> McpResult<u64> {
        let text = text.into();
        let uri = descriptor.uri.clone();
        let mut state = self.state.write();
        if state.resources.contains_key(&uri) {
            drop(state);
            return self.update(&uri, text);
        }
        check_capacity(state.resources.len(), self.max_resources)
            .map_err(|limit| McpError::RegistryFull { kind: "resources", limit })?;
        let mut descriptor = descriptor;
        descriptor.version = 1;
        state
            .resources
            .insert(uri.clone(), StoredResource { descriptor, text });
        drop(state);

        info!(uri = %uri, "Registered resource");
        self.changes.publish(McpMethod::ResourcesListChanged);
        Ok(1)
    }

    /// Replace the content of `uri`, bump its version and notify
    /// subscribers. Returns the new version.
    pub fn update(&self, uri: &str, text: impl Into<String>) -> McpResult<u64> {
        let mut state = self.state.write();
        let stored = state
            .resources
            .get_mut(uri)
            .ok_or_else(|| McpError::UnknownResource(uri.to_string()))?;
        stored.text = text.into();
        stored.descriptor.version += 1;
        let version = stored.descriptor.version;
        state.notify_updated(uri, version);
        debug!(uri = %uri, version, "Resource updated");
        Ok(version)
    }

    pub fn remove(&self, uri: &str) -> bool {
        let removed = {
            let mut state = self.state.write();
            state.subscriptions.remove(uri);
            state.resources.remove(uri).is_some()
        };
        if removed {
            self.changes.publish(McpMethod::ResourcesListChanged);
        }
        removed
    }

    pub fn list(&self) -> Vec<ResourceDescriptor> {
        self.state
            .read()
            .resources
            .values()
            .map(|r| r.descriptor.clone())
            .collect()
    }

    pub fn read(&self, uri: &str) -> McpResult<ResourceContents> {
        let state = self.state.read();
        let stored = state
            .resources
            .get(uri)
            .ok_or_else(|| McpError::UnknownResource(uri.to_string()))?;
        Ok(ResourceContents {
            uri: uri.to_string(),
            mime_type: stored.descriptor.mime_type.clone(),
            text: stored.text.clone(),
            version: stored.descriptor.version,
        })
    }

    /// Subscribe `subscriber` to `uri`. Returns false when the pair was
    /// already subscribed.
    pub fn subscribe(&self, subscriber: SessionId, sink: NotificationSink, uri: &str) -> McpResult<bool> {
        let mut state = self.state.write();
        if !state.resources.contains_key(uri) {
            return Err(McpError::UnknownResource(uri.to_string()));
        }
        let subscribers = state.subscriptions.entry(uri.to_string()).or_default();
        let created = !subscribers.contains_key(&subscriber);
        subscribers.insert(subscriber, sink);
        Ok(created)
    }

    /// Idempotent: unsubscribing an absent pair returns false.
    pub fn unsubscribe(&self, subscriber: SessionId, uri: &str) -> bool {
        let mut state = self.state.write();
        let Some(subscribers) = state.subscriptions.get_mut(uri) else {
            return false;
        };
        let removed = subscribers.remove(&subscriber).is_some();
        if subscribers.is_empty() {
            state.subscriptions.remove(uri);
        }
        removed
    }

    /// Drop every subscription held by `subscriber`, e.g. on disconnect.
    pub fn remove_subscriber(&self, subscriber: SessionId) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;
        state.subscriptions.retain(|_, subscribers| {
            if subscribers.remove(&subscriber).is_some() {
                removed += 1;
            }
            !subscribers.is_empty()
        });
        removed
    }

    pub fn subscriber_count(&self, uri: &str) -> usize {
        self.state
            .read()
            .subscriptions
            .get(uri)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl MethodHandler for ResourceHandler {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> McpResult<Value> {
        match method {
            McpMethod::ResourcesList => Ok(serde_json::to_value(ListResourcesResult {
                resources: self.list(),
            })?),
            McpMethod::ResourcesRead => {
                let params: ResourceUriParams = parse_params(method, params)?;
                let contents = self.read(&params.uri)?;
                Ok(serde_json::to_value(ReadResourceResult {
                    contents: vec![contents],
                })?)
            }
            McpMethod::ResourcesSubscribe => {
                let params: ResourceUriParams = parse_params(method, params)?;
                let Some(sink) = ctx.session.sink() else {
                    return Err(McpError::InvalidRequest(
                        "subscriptions need a duplex connection".to_string(),
                    ));
                };
                self.subscribe(ctx.session.id(), sink.clone(), &params.uri)?;
                Ok(json!({}))
            }
            McpMethod::ResourcesUnsubscribe => {
                let params: ResourceUriParams = parse_params(method, params)?;
                self.unsubscribe(ctx.session.id(), &params.uri);
                Ok(json!({}))
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}
