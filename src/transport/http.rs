//! HTTP request/response transport (client side).
//!
//! Every `send` is one POST; the body of the reply, if any, is queued for
//! `receive`. Exchanges are serialized, so a connection carries at most one
//! outstanding call.

use {
    super::{Transport, TransportKind},
    crate::error::TransportError,
    async_trait::async_trait,
    reqwest::{header, StatusCode, Url},
    std::time::Duration,
    tokio::sync::{mpsc, Mutex},
    tracing::debug,
};

pub const SESSION_HEADER: &str = "mcp-session-id";

struct ExchangeState {
    session_id: Option<String>,
    /// Dropped on close so `receive` observes end of stream.
    inbox: Option<mpsc::UnboundedSender<String>>,
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    state: Mutex<ExchangeState>,
    responses: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl HttpTransport {
    /// `address` is the server's MCP endpoint. A bare origin gets `/mcp`
    /// appended.
    pub fn new(address: &str, timeout: Duration) -> Result<Self, TransportError> {
        let mut endpoint = Url::parse(address)
            .map_err(|e| TransportError::UnsupportedAddress(format!("{address}: {e}")))?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(TransportError::UnsupportedAddress(address.to_string()));
        }
        if endpoint.path().is_empty() || endpoint.path() == "/" {
            endpoint.set_path("/mcp");
        }

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        let (tx, rx) = mpsc::unbounded_channel();

        Ok(Self {
            client,
            endpoint,
            state: Mutex::new(ExchangeState {
                session_id: None,
                inbox: Some(tx),
            }),
            responses: Mutex::new(rx),
        })
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session_id.clone()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        // Held across the exchange: one request in flight per connection.
        let mut state = self.state.lock().await;
        let Some(inbox) = state.inbox.clone() else {
            return Err(TransportError::ConnectionClosed);
        };

        let mut request = self
            .client
            .post(self.endpoint.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json")
            .body(message);
        if let Some(session_id) = &state.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await?;
        if let Some(value) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if state.session_id.as_deref() != Some(value) {
                debug!(session_id = value, "Captured MCP session ID");
                state.session_id = Some(value.to_string());
            }
        }

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if !body.trim().is_empty() {
            inbox
                .send(body)
                .map_err(|_| TransportError::ConnectionClosed)?;
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        Ok(self.responses.lock().await.recv().await)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.inbox.take().is_none() {
            return Ok(());
        }
        if let Some(session_id) = state.session_id.take() {
            // Best effort: a listener with an idle timeout reaps it otherwise
            let result = self
                .client
                .delete(self.endpoint.clone())
                .header(SESSION_HEADER, &session_id)
                .send()
                .await;
            if let Err(e) = result {
                debug!(error = %e, session_id = %session_id, "Failed to end HTTP session");
            }
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::RequestResponse
    }
}
