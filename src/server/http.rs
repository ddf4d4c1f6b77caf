//! HTTP listener
//!
//! Endpoints on one port:
//! - `POST /mcp`: one JSON-RPC message per request. An `initialize`
//!   without an `mcp-session-id` header opens a session whose id comes back
//!   in that header; later requests carry it. Requests without the header
//!   run in a throwaway session.
//! - `DELETE /mcp`: end the session named by the header.
//! - `GET /mcp` with `Upgrade: websocket`: a duplex connection, the only
//!   endpoint that delivers notifications and subscriptions.
//! - `GET /health`: [`HealthStatus`](crate::health::HealthStatus) as JSON.
//!
//! Bodies and WebSocket messages are bounded by
//! [`ResourceLimits::max_message_size`](crate::limits::ResourceLimits).

use {
    super::McpServer,
    crate::{
        error::{McpError, McpResult},
        logging,
        protocol::{Dispatcher, McpMethod, RawMessage},
        session::{Session, SessionId},
        transport::{http::SESSION_HEADER, WarpWebSocketTransport},
    },
    bytes::Bytes,
    serde_json::Value,
    std::{net::SocketAddr, sync::Arc},
    tokio::{net::TcpListener, task::JoinHandle},
    tokio_stream::wrappers::TcpListenerStream,
    tracing::{debug, warn},
    warp::{
        http::{HeaderValue, StatusCode},
        reply::Response,
        ws::Ws,
        Filter, Rejection, Reply,
    },
};

/// A running HTTP listener.
#[derive(Debug)]
pub struct HttpHandle {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl HttpHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address for [`HttpTransport`](crate::transport::HttpTransport).
    pub fn http_url(&self) -> String {
        format!("http://{}/mcp", self.local_addr)
    }

    /// Address for [`WebSocketTransport`](crate::transport::WebSocketTransport).
    pub fn ws_url(&self) -> String {
        format!("ws://{}/mcp", self.local_addr)
    }

    /// Wait for the listener to exit, which happens once the server stops.
    pub async fn join(self) -> McpResult<()> {
        self.task
            .await
            .map_err(|e| McpError::Internal(format!("HTTP listener failed: {e}")))
    }
}

impl McpServer {
    /// Bind `addr` and serve HTTP and WebSocket clients until shutdown.
    /// Port 0 picks a free port; see [`HttpHandle::local_addr`].
    pub async fn listen(&self, addr: SocketAddr) -> McpResult<HttpHandle> {
        self.start()?;
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let routes = routes(self.clone()).with(warp::trace::request());
        let shutdown = self.inner.lifecycle.shutdown_token();
        let serving = warp::serve(routes).serve_incoming_with_graceful_shutdown(
            TcpListenerStream::new(listener),
            async move { shutdown.cancelled().await },
        );
        let task = tokio::spawn(serving);
        self.spawn_idle_reaper();

        logging::log_server_ready(&format!("http://{local_addr}/mcp"));
        Ok(HttpHandle { local_addr, task })
    }
}

fn with_server(
    server: McpServer,
) -> impl Filter<Extract = (McpServer,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || server.clone())
}

fn routes(server: McpServer) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let max_message_size = server.inner.config.limits.max_message_size;

    let ws_route = warp::path!("mcp")
        .and(warp::ws())
        .and(with_server(server.clone()))
        .map(move |ws: Ws, server: McpServer| {
            ws.max_message_size(max_message_size)
                .max_frame_size(max_message_size)
                .on_upgrade(move |socket| async move {
                    let transport = Arc::new(WarpWebSocketTransport::new(socket));
                    if let Err(e) = server.serve(transport).await {
                        warn!(error = %e, "WebSocket connection ended with error");
                    }
                })
        });

    let post_route = warp::path!("mcp")
        .and(warp::post())
        .and(warp::header::optional::<String>(SESSION_HEADER))
        // Oversized bodies are refused with 413 before they are buffered
        .and(warp::body::content_length_limit(max_message_size as u64))
        .and(warp::body::bytes())
        .and(with_server(server.clone()))
        .and_then(handle_post);

    let delete_route = warp::path!("mcp")
        .and(warp::delete())
        .and(warp::header::optional::<String>(SESSION_HEADER))
        .and(with_server(server.clone()))
        .map(handle_delete);

    let health_route = warp::path!("health")
        .and(warp::get())
        .and(with_server(server))
        .map(|server: McpServer| warp::reply::json(&server.health_status()));

    ws_route.or(post_route).or(delete_route).or(health_route)
}

fn is_initialize(body: &[u8]) -> bool {
    RawMessage::from_slice(body)
        .map(|raw| raw.method.as_deref() == Some(McpMethod::Initialize.as_str()))
        .unwrap_or(false)
}

fn json_reply(status: StatusCode, body: String) -> Response {
    warp::reply::with_status(
        warp::reply::with_header(body, "content-type", "application/json"),
        status,
    )
    .into_response()
}

fn is_error_response(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .map(|v| v.get("error").is_some())
        .unwrap_or(false)
}

async fn handle_post(
    session_header: Option<String>,
    body: Bytes,
    server: McpServer,
) -> Result<Response, Rejection> {
    let (session, created) = match session_header {
        Some(header) => match SessionId::parse(&header).and_then(|id| server.session(&id)) {
            Some(session) => (session, false),
            None => {
                debug!(session = %header, "Request for unknown session");
                let error = McpError::InvalidRequest(format!("unknown session '{header}'"));
                return Ok(json_reply(
                    StatusCode::NOT_FOUND,
                    error.to_json_rpc_error(None).to_string(),
                ));
            }
        },
        None if is_initialize(&body) => match server.open_session(None) {
            Ok(session) => (session, true),
            Err(e) => {
                let reply = Dispatcher::reject(&body, e).unwrap_or_default();
                return Ok(json_reply(StatusCode::OK, reply));
            }
        },
        None => (Arc::new(Session::new(server.capabilities(), None)), false),
    };

    let text = match std::str::from_utf8(&body) {
        Ok(text) => text,
        Err(e) => {
            if created {
                server.close_session(&session.id());
            }
            let error = McpError::Parse(format!("body is not UTF-8: {e}"));
            return Ok(json_reply(StatusCode::OK, error.to_json_rpc_error(None).to_string()));
        }
    };

    let Some(reply) = server.handle_message(&session, text).await else {
        return Ok(StatusCode::ACCEPTED.into_response());
    };

    if created && is_error_response(&reply) {
        server.close_session(&session.id());
        return Ok(json_reply(StatusCode::OK, reply));
    }

    let mut response = json_reply(StatusCode::OK, reply);
    if created {
        if let Ok(value) = HeaderValue::from_str(&session.id().to_string()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    Ok(response)
}

fn handle_delete(session_header: Option<String>, server: McpServer) -> Response {
    let closed = session_header
        .as_deref()
        .and_then(SessionId::parse)
        .is_some_and(|id| server.close_session(&id));
    if closed {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}
