//! Per-connection session state.

use {
    crate::{
        capabilities::{CapabilityGroup, CapabilitySet},
        error::{McpError, McpResult},
        limits::check_capacity,
        protocol::{types::Implementation, McpMethod, Notification, RequestId},
    },
    dashmap::DashMap,
    parking_lot::{Mutex, RwLock},
    std::{
        fmt,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    },
    tokio::{sync::mpsc, time::Instant},
    uuid::Uuid,
};

/// Subscriber identity. One per connection, or per `mcp-session-id` on HTTP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outbound channel for unsolicited server messages on a duplex connection.
#[derive(Debug, Clone)]
pub struct NotificationSink(mpsc::UnboundedSender<String>);

impl NotificationSink {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self(tx)
    }

    /// Queue a notification. Returns false once the connection is gone.
    pub fn send(&self, notification: &Notification) -> bool {
        match notification.encode() {
            Ok(encoded) => self.0.send(encoded).is_ok(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification");
                !self.0.is_closed()
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    capabilities: RwLock<CapabilitySet>,
    protocol_version: RwLock<Option<String>>,
    client_info: RwLock<Option<Implementation>>,
    initialized: AtomicBool,
    sink: Option<NotificationSink>,
    last_active: Mutex<Instant>,
}

impl Session {
    /// A fresh session starts with the server's full capability set; the
    /// `initialize` handshake narrows it.
    pub fn new(capabilities: CapabilitySet, sink: Option<NotificationSink>) -> Self {
        Self {
            id: SessionId::new(),
            capabilities: RwLock::new(capabilities),
            protocol_version: RwLock::new(None),
            client_info: RwLock::new(None),
            initialized: AtomicBool::new(false),
            sink,
            last_active: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn capabilities(&self) -> CapabilitySet {
        *self.capabilities.read()
    }

    pub fn sink(&self) -> Option<&NotificationSink> {
        self.sink.as_ref()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.protocol_version.read().clone()
    }

    pub fn client_info(&self) -> Option<Implementation> {
        self.client_info.read().clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Time since the last message on this session.
    pub fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    pub(crate) fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    pub(crate) fn record_handshake(
        &self,
        capabilities: CapabilitySet,
        protocol_version: &str,
        client_info: Option<Implementation>,
    ) {
        *self.capabilities.write() = capabilities;
        *self.protocol_version.write() = Some(protocol_version.to_string());
        *self.client_info.write() = client_info;
    }

    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Whether a server-originated notification should reach this session.
    /// `list_changed` notifications additionally need the sub-feature.
    pub fn accepts(&self, method: McpMethod) -> bool {
        let caps = self.capabilities();
        if !caps.is_enabled(method) {
            return false;
        }
        match method {
            McpMethod::ResourcesListChanged => caps.resources.is_some_and(|r| r.list_changed),
            McpMethod::ToolsListChanged => caps.tools.is_some_and(|t| t.list_changed),
            McpMethod::PromptsListChanged => caps.prompts.is_some_and(|p| p.list_changed),
            McpMethod::ResourceUpdated => caps.has_group(CapabilityGroup::Resources),
            _ => true,
        }
    }
}

/// Everything a handler may need about the message being served.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub session: Arc<Session>,
    /// `None` for notifications.
    pub request_id: Option<RequestId>,
}

impl RequestContext {
    pub fn new(session: Arc<Session>, request_id: Option<RequestId>) -> Self {
        Self {
            session,
            request_id,
        }
    }
}

/// Live sessions, bounded by `max_sessions`.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(max_sessions: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_sessions,
        }
    }

    pub fn insert(&self, session: Arc<Session>) -> McpResult<()> {
        check_capacity(self.sessions.len(), self.max_sessions).map_err(McpError::TooManySessions)?;
        self.sessions.insert(session.id(), session);
        Ok(())
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, session)| session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }

    /// Sessions without a live connection that have been quiet for longer
    /// than `idle`. Connection-bound sessions end with their connection.
    pub fn idle_detached(&self, idle: Duration) -> Vec<SessionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.sink().is_none() && entry.idle_for() > idle)
            .map(|entry| *entry.key())
            .collect()
    }
}
