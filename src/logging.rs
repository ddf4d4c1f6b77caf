//! Structured logging for the MCP core
//!
//! Everything logs through `tracing`. Connections get a [`McpConnectionId`]
//! and a span; each dispatched message runs inside a request span. Events
//! carry an `event` field so log pipelines can filter on it.

use {
    std::{
        fmt,
        time::{Duration, Instant},
    },
    tracing::{debug, error, info, info_span, trace, warn, Span},
    tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter},
    uuid::Uuid,
};

const DEFAULT_FILTER: &str = "mcpmesh=info,warp=info";

/// Install the global subscriber. `RUST_LOG` overrides the default filter
/// and `LOG_FORMAT=json` switches to JSON lines. Safe to call more than
/// once; later calls are ignored.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let json_format = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if json_format {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_line_number(true),
            )
            .try_init()
    };

    if installed.is_ok() {
        debug!(json = json_format, "Tracing initialized");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct McpConnectionId(Uuid);

impl McpConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for McpConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for McpConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

pub fn connection_span(connection_id: &McpConnectionId, transport: &str) -> Span {
    info_span!("mcp_connection", connection_id = %connection_id, transport = %transport)
}

pub fn request_span(method: &str, request_id: Option<&str>, session_id: &str) -> Span {
    info_span!("mcp_request", method = %method, request_id, session_id = %session_id)
}

pub fn log_connection_opened(connection_id: &McpConnectionId, transport: &str) {
    info!(connection_id = %connection_id, transport, event = "connection_opened", "Connection opened");
}

pub fn log_connection_closed(connection_id: &McpConnectionId, started: Instant) {
    info!(
        connection_id = %connection_id,
        duration_ms = started.elapsed().as_millis() as u64,
        event = "connection_closed",
        "Connection closed"
    );
}

pub fn log_message_received(message_size: usize) {
    trace!(message_size, event = "message_received", "Received message");
}

pub fn log_message_parsed(method: &str, id: Option<&str>) {
    debug!(method, message_id = ?id, event = "message_parsed", "Dispatching message");
}

pub fn log_handler_success(method: &str, duration: Duration) {
    debug!(
        method,
        duration_ms = duration.as_millis() as u64,
        event = "handler_success",
        "Handled method"
    );
}

pub fn log_handler_error(method: &str, error: &str, duration: Duration) {
    warn!(
        method,
        error,
        duration_ms = duration.as_millis() as u64,
        event = "handler_error",
        "Method failed"
    );
}

pub fn log_response_error(error: &str) {
    error!(error, event = "response_error", "Could not encode response");
}

pub fn log_parse_error(error: &str, message_size: usize) {
    warn!(error, message_size, event = "parse_error", "Rejected unparseable message");
}

pub fn log_unknown_method(method: &str) {
    warn!(method, event = "unknown_method", "Unknown MCP method requested");
}

pub fn log_capability_rejected(method: &str, session_id: &str) {
    warn!(
        method,
        session_id,
        event = "capability_not_negotiated",
        "Method rejected: capability not negotiated"
    );
}

pub fn log_tool_call(tool: &str, args: &serde_json::Value) {
    debug!(tool, args = %args, event = "tool_call", "Tool call requested");
}

/// Outcome of one executor run. `error` is `None` on success.
pub fn log_tool_finished(tool: &str, duration: Duration, error: Option<&str>) {
    let duration_ms = duration.as_millis() as u64;
    match error {
        None => info!(tool, duration_ms, event = "tool_execution_success", "Tool executed"),
        Some(error) => warn!(
            tool,
            duration_ms,
            error,
            event = "tool_execution_error",
            "Tool execution failed"
        ),
    }
}

pub fn log_server_ready(addr: &str) {
    info!(address = %addr, event = "server_ready", "MCP server listening");
}

pub fn log_server_shutdown(in_flight: usize) {
    info!(in_flight, event = "server_shutdown", "MCP server shutting down");
}

pub fn log_call_retry(method: &str, attempt: u32, delay: Duration, error: &str) {
    debug!(
        method,
        attempt,
        delay_ms = delay.as_millis() as u64,
        error,
        event = "call_retry",
        "Retrying call"
    );
}

pub fn log_endpoint_health(address: &str, healthy: bool) {
    if healthy {
        info!(address, event = "endpoint_restored", "Endpoint restored to rotation");
    } else {
        warn!(address, event = "endpoint_unhealthy", "Endpoint marked unhealthy");
    }
}
