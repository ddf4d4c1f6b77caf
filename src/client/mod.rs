//! MCP Client
//!
//! [`McpClient`] owns one transport to one server. A background reader
//! demultiplexes incoming traffic: responses complete the pending call with
//! the same id, notifications go to [`McpClient::notifications`]. Listing
//! results are cached until the server announces a change or the caller
//! invalidates them.

mod stats;

pub use stats::ClientStats;

use {
    crate::{
        capabilities::CapabilitySet,
        config::ClientConfig,
        error::{ClientError, ClientResult, ErrorCode, RemoteError},
        logging,
        protocol::{
            types::{
                CallToolParams, CallToolResult, CreateMessageParams, CreateMessageResult,
                GetPromptParams, GetPromptResult, Implementation, InitializeParams,
                InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
                PromptInfo, ReadResourceResult, ResourceContents, ResourceDescriptor,
                ResourceUriParams, ToolSpec,
            },
            McpMethod, Message, Notification, Outcome, Request, RequestId,
            LATEST_PROTOCOL_VERSION,
        },
        transport::Transport,
    },
    dashmap::DashMap,
    parking_lot::RwLock,
    serde::{de::DeserializeOwned, Serialize},
    serde_json::{Map, Value},
    stats::StatsRecorder,
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicI64, Ordering},
            Arc,
        },
    },
    tokio::{
        sync::{broadcast, oneshot, Mutex},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn, Instrument},
};

type Pending = DashMap<RequestId, oneshot::Sender<Outcome>>;

/// Listing results keyed by the list method that produced them.
/// `generation` moves on every invalidation, so a fetch that started
/// before one is not cached.
#[derive(Default)]
struct ListingCache {
    entries: HashMap<McpMethod, Value>,
    generation: u64,
}

impl ListingCache {
    fn invalidate(&mut self, method: Option<McpMethod>) {
        match method {
            Some(method) => {
                self.entries.remove(&method);
            }
            None => self.entries.clear(),
        }
        self.generation += 1;
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    pending: Pending,
    next_id: AtomicI64,
    notifications: broadcast::Sender<Notification>,
    metadata: RwLock<ListingCache>,
    server: RwLock<Option<InitializeResult>>,
    /// Held for a whole exchange on transports that cannot interleave calls.
    serial: Option<Mutex<()>>,
    stats: StatsRecorder,
    closed: CancellationToken,
}

/// Removes a pending entry however the call ends, so a response arriving
/// after a timeout finds nothing to complete and is dropped.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

pub struct McpClient {
    inner: Arc<ClientInner>,
    reader: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Open a session over `transport`: start the reader, run the
    /// `initialize` handshake and send `notifications/initialized`.
    pub async fn connect(transport: Arc<dyn Transport>, config: ClientConfig) -> ClientResult<Self> {
        let (notifications, _) = broadcast::channel(config.notification_buffer.max(1));
        let serial = (!transport.is_multiplexed()).then(|| Mutex::new(()));
        let inner = Arc::new(ClientInner {
            transport,
            config,
            pending: DashMap::new(),
            next_id: AtomicI64::new(1),
            notifications,
            metadata: RwLock::new(ListingCache::default()),
            server: RwLock::new(None),
            serial,
            stats: StatsRecorder::default(),
            closed: CancellationToken::new(),
        });
        let reader = tokio::spawn(read_incoming(inner.clone()).in_current_span());
        let client = Self {
            inner,
            reader: parking_lot::Mutex::new(Some(reader)),
        };

        match client.initialize().await {
            Ok(result) => {
                info!(
                    server = %result.server_info.name,
                    version = %result.protocol_version,
                    "Connected to MCP server"
                );
                Ok(client)
            }
            Err(e) => {
                client.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(&self) -> ClientResult<InitializeResult> {
        let config = &self.inner.config;
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: Some(config.capabilities),
            client_info: Some(Implementation {
                name: config.client_name.clone(),
                version: config.client_version.clone(),
            }),
        };
        let result: InitializeResult = self.call_typed(McpMethod::Initialize, &params).await?;
        *self.inner.server.write() = Some(result.clone());
        self.notify(McpMethod::Initialized, None).await?;
        Ok(result)
    }

    /// Capabilities the server agreed to in the handshake.
    pub fn server_capabilities(&self) -> CapabilitySet {
        self.inner
            .server
            .read()
            .as_ref()
            .map(|s| s.capabilities)
            .unwrap_or_default()
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.inner.server.read().as_ref().map(|s| s.server_info.clone())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    pub fn stats(&self) -> ClientStats {
        self.inner.stats.snapshot()
    }

    /// Server notifications. Each receiver sees notifications sent after
    /// it subscribed; a slow receiver loses the oldest.
    pub fn notifications(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifications.subscribe()
    }

    /// Issue `method` and wait for its result. Connection failures,
    /// including timeouts, are retried per the configured policy; error
    /// responses are returned at once.
    pub async fn call(&self, method: McpMethod, params: Option<Value>) -> ClientResult<Value> {
        let policy = &self.inner.config.retry;
        let mut attempt = 0;
        loop {
            let result = self.call_once(method, params.clone()).await;
            match result {
                Err(e) if e.is_transient() && attempt < policy.max_retries && !self.is_closed() => {
                    attempt += 1;
                    let delay = policy.delay_for(attempt);
                    self.inner.stats.retry();
                    logging::log_call_retry(method.as_str(), attempt, delay, &e.to_string());
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.inner.stats.failure();
                    return Err(e);
                }
                ok => return ok,
            }
        }
    }

    async fn call_once(&self, method: McpMethod, params: Option<Value>) -> ClientResult<Value> {
        if self.is_closed() {
            return Err(ClientError::Connection("client is closed".to_string()));
        }
        let _serial = match &self.inner.serial {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let id = RequestId::Number(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(id.clone(), tx);
        let _pending = PendingGuard {
            pending: &self.inner.pending,
            id: id.clone(),
        };
        // The reader may have exited between the check above and the insert
        if self.is_closed() {
            return Err(ClientError::Connection("client is closed".to_string()));
        }

        let encoded = Message::Request(Request::new(id, method, params))
            .encode()
            .map_err(|e| {
                ClientError::Protocol(RemoteError::local(ErrorCode::InvalidRequest, e.to_string()))
            })?;
        self.inner.stats.request();
        self.inner.transport.send(encoded).await?;

        let timeout = self.inner.config.request_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Err(_) => {
                warn!(method = %method, timeout_ms = timeout.as_millis() as u64, "Call timed out");
                Err(ClientError::timeout(timeout))
            }
            Ok(Err(_)) => Err(ClientError::Connection(
                "connection closed before a response arrived".to_string(),
            )),
            Ok(Ok(Outcome::Result(value))) => Ok(value),
            Ok(Ok(Outcome::Error(error))) => Err(ClientError::from_remote(error.into())),
        }
    }

    async fn call_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: McpMethod,
        params: &P,
    ) -> ClientResult<R> {
        let params = serde_json::to_value(params).map_err(|e| {
            ClientError::Validation(RemoteError::local(ErrorCode::InvalidParams, e.to_string()))
        })?;
        let value = self.call(method, Some(params)).await?;
        decode(method, value)
    }

    /// Send a notification. Nothing comes back.
    pub async fn notify(&self, method: McpMethod, params: Option<Value>) -> ClientResult<()> {
        let encoded = Notification::new(method, params).encode().map_err(|e| {
            ClientError::Protocol(RemoteError::local(ErrorCode::InvalidRequest, e.to_string()))
        })?;
        self.inner.transport.send(encoded).await?;
        Ok(())
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.call(McpMethod::Ping, None).await.map(|_| ())
    }

    async fn cached_listing(&self, method: McpMethod) -> ClientResult<Value> {
        let generation = {
            let cache = self.inner.metadata.read();
            if let Some(cached) = cache.entries.get(&method) {
                return Ok(cached.clone());
            }
            cache.generation
        };
        let value = self.call(method, None).await?;
        let mut cache = self.inner.metadata.write();
        if cache.generation == generation {
            cache.entries.insert(method, value.clone());
        } else {
            debug!(method = %method, "Listing changed while fetching, not caching");
        }
        Ok(value)
    }

    /// Drop cached listings so the next list call asks the server.
    pub fn invalidate_metadata(&self) {
        self.inner.metadata.write().invalidate(None);
    }

    /// Drop the cached result of one list method.
    pub fn invalidate_listing(&self, method: McpMethod) {
        self.inner.metadata.write().invalidate(Some(method));
    }

    pub async fn list_tools(&self) -> ClientResult<Vec<ToolSpec>> {
        let value = self.cached_listing(McpMethod::ToolsList).await?;
        decode::<ListToolsResult>(McpMethod::ToolsList, value).map(|r| r.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<CallToolResult> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.call_typed(McpMethod::ToolsCall, &params).await
    }

    pub async fn list_resources(&self) -> ClientResult<Vec<ResourceDescriptor>> {
        let value = self.cached_listing(McpMethod::ResourcesList).await?;
        decode::<ListResourcesResult>(McpMethod::ResourcesList, value).map(|r| r.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> ClientResult<ResourceContents> {
        let params = ResourceUriParams { uri: uri.to_string() };
        let result: ReadResourceResult = self.call_typed(McpMethod::ResourcesRead, &params).await?;
        result.contents.into_iter().next().ok_or_else(|| {
            ClientError::Protocol(RemoteError::local(
                ErrorCode::InternalError,
                format!("empty read result for '{uri}'"),
            ))
        })
    }

    /// Ask for `notifications/resources/updated` on `uri`. Needs a duplex
    /// transport.
    pub async fn subscribe(&self, uri: &str) -> ClientResult<()> {
        let params = ResourceUriParams { uri: uri.to_string() };
        self.call_typed::<_, Value>(McpMethod::ResourcesSubscribe, &params)
            .await
            .map(|_| ())
    }

    pub async fn unsubscribe(&self, uri: &str) -> ClientResult<()> {
        let params = ResourceUriParams { uri: uri.to_string() };
        self.call_typed::<_, Value>(McpMethod::ResourcesUnsubscribe, &params)
            .await
            .map(|_| ())
    }

    pub async fn list_prompts(&self) -> ClientResult<Vec<PromptInfo>> {
        let value = self.cached_listing(McpMethod::PromptsList).await?;
        decode::<ListPromptsResult>(McpMethod::PromptsList, value).map(|r| r.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ClientResult<GetPromptResult> {
        let params = GetPromptParams {
            name: name.to_string(),
            arguments,
        };
        self.call_typed(McpMethod::PromptsGet, &params).await
    }

    pub async fn create_message(&self, params: &CreateMessageParams) -> ClientResult<CreateMessageResult> {
        self.call_typed(McpMethod::SamplingCreateMessage, params).await
    }

    /// Close the transport and fail any call still waiting. Idempotent.
    pub async fn close(&self) {
        if !self.inner.closed.is_cancelled() {
            self.inner.closed.cancel();
            if let Err(e) = self.inner.transport.close().await {
                debug!(error = %e, "Transport close failed");
            }
        }
        let reader = self.reader.lock().take();
        if let Some(reader) = reader {
            if let Err(e) = reader.await {
                debug!(error = %e, "Reader task ended abnormally");
            }
        }
        self.inner.pending.clear();
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        self.inner.closed.cancel();
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

fn decode<R: DeserializeOwned>(method: McpMethod, value: Value) -> ClientResult<R> {
    serde_json::from_value(value).map_err(|e| {
        ClientError::Protocol(RemoteError::local(
            ErrorCode::InvalidRequest,
            format!("unexpected {method} result: {e}"),
        ))
    })
}

fn listing_for(notification: McpMethod) -> Option<McpMethod> {
    match notification {
        McpMethod::ToolsListChanged => Some(McpMethod::ToolsList),
        McpMethod::ResourcesListChanged => Some(McpMethod::ResourcesList),
        McpMethod::PromptsListChanged => Some(McpMethod::PromptsList),
        _ => None,
    }
}

async fn read_incoming(inner: Arc<ClientInner>) {
    loop {
        let incoming = tokio::select! {
            _ = inner.closed.cancelled() => break,
            incoming = inner.transport.receive() => incoming,
        };
        let raw = match incoming {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Server closed the connection");
                break;
            }
            Err(crate::error::TransportError::Framing(e)) => {
                warn!(error = %e, "Skipping unreadable frame");
                continue;
            }
            Err(e) => {
                warn!(error = %e, "Transport failed");
                break;
            }
        };

        match Message::parse(raw.as_bytes()) {
            Ok(Message::Response(response)) => {
                let Some(id) = response.id else {
                    warn!("Server sent an error without a request id");
                    continue;
                };
                match inner.pending.remove(&id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(response.outcome);
                    }
                    None => debug!(id = %id, "Discarding late or unknown response"),
                }
            }
            Ok(Message::Notification(notification)) => {
                inner.stats.notification();
                if let Ok(method) = notification.method.parse::<McpMethod>() {
                    if let Some(listing) = listing_for(method) {
                        inner.metadata.write().invalidate(Some(listing));
                    }
                }
                let _ = inner.notifications.send(notification);
            }
            Ok(Message::Request(request)) => {
                debug!(method = %request.method, "Ignoring server-initiated request");
            }
            Err(rejected) => warn!(error = %rejected.error, "Unparseable message from server"),
        }
    }

    inner.closed.cancel();
    // Dropping the senders fails every waiting call with a connection error
    inner.pending.clear();
}
