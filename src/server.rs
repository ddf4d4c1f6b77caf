//! MCP Server Core
//!
//! [`McpServer`] owns the dispatcher, the feature handlers and the
//! lifecycle. Each accepted connection becomes a [`Session`] served by
//! [`McpServer::serve`]; HTTP and WebSocket clients are served through [`McpServer::listen`].

pub mod builder;
pub mod http;
pub mod lifecycle;

pub use {
    builder::McpServerBuilder,
    http::HttpHandle,
    lifecycle::{InFlightGuard, Lifecycle, ServerState},
};

use {
    crate::{
        capabilities::CapabilitySet,
        config::ServerConfig,
        error::{McpError, McpResult, TransportError},
        handlers::{ChangeFeed, PromptHandler, ResourceHandler, SamplingHandler, ToolHandler},
        health::{HealthChecker, HealthStatus},
        logging::{self, McpConnectionId},
        protocol::{
            negotiate_version, parse_params,
            types::{Implementation, InitializeParams, InitializeResult},
            Dispatcher, McpMethod, MethodHandler, Notification,
        },
        session::{NotificationSink, RequestContext, Session, SessionId, SessionRegistry},
        transport::{StreamTransport, Transport},
    },
    async_trait::async_trait,
    serde_json::{json, Value},
    std::{
        sync::Arc,
        time::{Duration, Instant},
    },
    tokio::{
        sync::{broadcast::error::RecvError, mpsc},
        task::{JoinHandle, JoinSet},
        time::MissedTickBehavior,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn, Instrument},
};

/// Answers the handshake and keep-alive methods.
pub(crate) struct LifecycleHandler {
    capabilities: CapabilitySet,
    info: Implementation,
}

impl LifecycleHandler {
    pub(crate) fn new(capabilities: CapabilitySet, info: Implementation) -> Self {
        Self { capabilities, info }
    }
}

#[async_trait]
impl MethodHandler for LifecycleHandler {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> McpResult<Value> {
        match method {
            McpMethod::Initialize => {
                let params: InitializeParams = parse_params(method, params)?;
                let requested = params.capabilities.unwrap_or(self.capabilities);
                let negotiated = self.capabilities.negotiate(&requested);
                let version = negotiate_version(&params.protocol_version);
                info!(
                    session = %ctx.session.id(),
                    client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
                    requested_version = %params.protocol_version,
                    version,
                    "Session initialized"
                );
                ctx.session
                    .record_handshake(negotiated, version, params.client_info);
                Ok(serde_json::to_value(InitializeResult {
                    protocol_version: version.to_string(),
                    capabilities: negotiated,
                    server_info: self.info.clone(),
                })?)
            }
            McpMethod::Ping => Ok(json!({})),
            McpMethod::Initialized => {
                ctx.session.mark_initialized();
                Ok(Value::Null)
            }
            McpMethod::Cancelled => {
                debug!(session = %ctx.session.id(), params = ?params, "Peer cancelled a request");
                Ok(Value::Null)
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}

pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    /// Declared set after removing groups without a backing handler.
    pub(crate) capabilities: CapabilitySet,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) sessions: SessionRegistry,
    pub(crate) tools: Arc<ToolHandler>,
    pub(crate) resources: Arc<ResourceHandler>,
    pub(crate) prompts: Arc<PromptHandler>,
    pub(crate) sampling: Option<Arc<SamplingHandler>>,
    pub(crate) changes: ChangeFeed,
    pub(crate) health: HealthChecker,
}

/// A configured MCP server. Cloning is cheap and every clone drives the
/// same server.
#[derive(Clone)]
pub struct McpServer {
    pub(crate) inner: Arc<ServerInner>,
}

impl McpServer {
    pub fn builder(name: impl Into<String>, version: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name, version)
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ServerState {
        self.inner.lifecycle.state()
    }

    /// Capabilities offered to clients before negotiation.
    pub fn capabilities(&self) -> CapabilitySet {
        self.inner.capabilities
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn tools(&self) -> &ToolHandler {
        &self.inner.tools
    }

    pub fn resources(&self) -> &ResourceHandler {
        &self.inner.resources
    }

    pub fn prompts(&self) -> &PromptHandler {
        &self.inner.prompts
    }

    pub fn sampling(&self) -> Option<&SamplingHandler> {
        self.inner.sampling.as_deref()
    }

    pub fn health_status(&self) -> HealthStatus {
        self.inner.health.status(
            self.state(),
            self.session_count(),
            self.inner.lifecycle.in_flight(),
        )
    }

    /// Fix capabilities and begin accepting calls. Calling it again while
    /// serving is a no-op.
    pub fn start(&self) -> McpResult<()> {
        let lifecycle = &self.inner.lifecycle;
        for next in [ServerState::Negotiated, ServerState::Serving] {
            let current = lifecycle.state();
            if current >= ServerState::Stopping {
                return Err(McpError::NotServing(current.to_string()));
            }
            if current < next {
                if let Err(e) = lifecycle.advance(next) {
                    // A concurrent start() got there first
                    let now = lifecycle.state();
                    if now < next || now >= ServerState::Stopping {
                        return Err(e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Register a session. Sessions with a sink can receive notifications
    /// and hold subscriptions.
    pub fn open_session(&self, sink: Option<NotificationSink>) -> McpResult<Arc<Session>> {
        let session = Arc::new(Session::new(self.inner.capabilities, sink));
        self.inner.sessions.insert(session.clone())?;
        debug!(session = %session.id(), "Session opened");
        Ok(session)
    }

    pub fn session(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.inner.sessions.get(id)
    }

    /// Forget a session and drop its subscriptions. Returns whether it
    /// existed.
    pub fn close_session(&self, id: &SessionId) -> bool {
        let removed = self.inner.resources.remove_subscriber(*id);
        let existed = self.inner.sessions.remove(id).is_some();
        if existed {
            debug!(session = %id, subscriptions = removed, "Session closed");
        }
        existed
    }

    /// Close detached sessions idle past the configured timeout. Returns
    /// how many were closed.
    pub fn reap_idle_sessions(&self) -> usize {
        let Some(idle) = self.inner.config.session_idle_timeout else {
            return 0;
        };
        let reaped = self
            .inner
            .sessions
            .idle_detached(idle)
            .into_iter()
            .filter(|id| self.close_session(id))
            .count();
        if reaped > 0 {
            info!(reaped, idle_secs = idle.as_secs(), "Closed idle sessions");
        }
        reaped
    }

    /// Sweep idle sessions until shutdown. `None` when no timeout is set.
    pub(crate) fn spawn_idle_reaper(&self) -> Option<JoinHandle<()>> {
        let idle = self.inner.config.session_idle_timeout?;
        let period = (idle / 2).max(Duration::from_millis(100));
        let server = self.clone();
        let shutdown = self.inner.lifecycle.shutdown_token();
        Some(tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticks.tick() => {
                        server.reap_idle_sessions();
                    }
                }
            }
        }))
    }

    /// Process one encoded message on behalf of `session`.
    ///
    /// Calls arriving outside the serving state are answered with an
    /// invalid-request error without reaching any handler.
    pub async fn handle_message(&self, session: &Arc<Session>, raw: &str) -> Option<String> {
        session.touch();
        let _guard = match self.inner.lifecycle.begin_call() {
            Ok(guard) => guard,
            Err(e) => {
                debug!(error = %e, "Rejecting message outside serving state");
                return Dispatcher::reject(raw.as_bytes(), e);
            }
        };
        self.inner.dispatcher.dispatch(raw.as_bytes(), session).await
    }

    /// Serve one connection until the peer hangs up or the server stops.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> McpResult<()> {
        self.start()?;
        let connection_id = McpConnectionId::new();
        let span = logging::connection_span(&connection_id, &transport.kind().to_string());
        self.run_connection(transport, connection_id)
            .instrument(span)
            .await
    }

    /// Serve a single client over this process's stdin/stdout.
    pub async fn serve_stdio(&self) -> McpResult<()> {
        let max_frame = self.inner.config.limits.max_message_size;
        self.serve(Arc::new(StreamTransport::stdio_with_max_frame(max_frame)))
            .await
    }

    async fn run_connection(
        &self,
        transport: Arc<dyn Transport>,
        connection_id: McpConnectionId,
    ) -> McpResult<()> {
        let started = Instant::now();
        logging::log_connection_opened(&connection_id, &transport.kind().to_string());

        let (outbox, outgoing) = mpsc::unbounded_channel::<String>();
        let session = match self.open_session(Some(NotificationSink::new(outbox.clone()))) {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Refusing connection");
                transport.close().await?;
                return Err(e);
            }
        };

        let done = CancellationToken::new();
        let writer = tokio::spawn(
            write_outgoing(transport.clone(), outgoing, done.clone()).in_current_span(),
        );

        let mut changes = self.inner.changes.subscribe();
        let shutdown = self.inner.lifecycle.shutdown_token();
        let multiplexed = transport.is_multiplexed();
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Server stopping, closing connection");
                    break;
                }
                incoming = transport.receive() => match incoming {
                    Ok(Some(raw)) => {
                        if multiplexed {
                            let server = self.clone();
                            let session = session.clone();
                            let outbox = outbox.clone();
                            tasks.spawn(
                                async move {
                                    if let Some(reply) = server.handle_message(&session, &raw).await {
                                        let _ = outbox.send(reply);
                                    }
                                }
                                .in_current_span(),
                            );
                        } else if let Some(reply) = self.handle_message(&session, &raw).await {
                            let _ = outbox.send(reply);
                        }
                    }
                    Ok(None) => {
                        debug!("Peer closed connection");
                        break;
                    }
                    Err(TransportError::Framing(e)) => {
                        warn!(error = %e, "Skipping unreadable frame");
                    }
                    Err(e) => {
                        warn!(error = %e, "Transport failed");
                        break;
                    }
                },
                change = changes.recv() => match change {
                    Ok(method) => {
                        if session.accepts(method) {
                            if let Some(sink) = session.sink() {
                                sink.send(&Notification::new(method, None));
                            }
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Change feed lagged");
                    }
                    Err(RecvError::Closed) => {}
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Request task failed");
                    }
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Request task failed");
            }
        }
        self.close_session(&session.id());
        drop(session);
        drop(outbox);
        done.cancel();
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
        if let Err(e) = transport.close().await {
            debug!(error = %e, "Transport close failed");
        }
        logging::log_connection_closed(&connection_id, started);
        Ok(())
    }

    /// Stop accepting calls, wait for running calls, then close every
    /// connection. Calling it again waits for the first shutdown.
    pub async fn shutdown(&self) -> McpResult<()> {
        let lifecycle = &self.inner.lifecycle;
        if let Err(e) = lifecycle.advance(ServerState::Stopping) {
            if lifecycle.state() >= ServerState::Stopping {
                lifecycle.wait_stopped().await;
                return Ok(());
            }
            return Err(e);
        }
        logging::log_server_shutdown(lifecycle.in_flight());
        lifecycle.drain().await;
        lifecycle.signal_shutdown();
        self.inner.sessions.clear();
        lifecycle.advance(ServerState::Stopped)
    }

    /// Resolves once the server has fully stopped.
    pub async fn stopped(&self) {
        self.inner.lifecycle.wait_stopped().await;
    }
}

/// Single writer per connection, so responses and notifications never
/// interleave mid-frame. Flushes what is queued once `done` fires.
async fn write_outgoing(
    transport: Arc<dyn Transport>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    done: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            biased;
            message = outgoing.recv() => match message {
                Some(message) => message,
                None => return,
            },
            _ = done.cancelled() => {
                while let Ok(message) = outgoing.try_recv() {
                    if transport.send(message).await.is_err() {
                        return;
                    }
                }
                return;
            }
        };
        if let Err(e) = transport.send(message).await {
            warn!(error = %e, "Failed to write message");
            return;
        }
    }
}
