//! Turning a server address into a transport.

use {
    crate::{
        config::RetryPolicy,
        error::TransportError,
        transport::{HttpTransport, StreamTransport, Transport, WebSocketTransport},
    },
    async_trait::async_trait,
    std::{sync::Arc, time::Duration},
};

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Address schemes:
/// - `http://`, `https://`: [`HttpTransport`]
/// - `ws://`, `wss://`: [`WebSocketTransport`], resilient when a reconnect
///   policy is set
/// - `stdio:<program> [args...]`: a child process spoken to over its pipes
#[derive(Debug, Clone)]
pub struct DefaultConnector {
    http_timeout: Duration,
    reconnect: Option<RetryPolicy>,
}

impl Default for DefaultConnector {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            reconnect: None,
        }
    }
}

impl DefaultConnector {
    pub fn new(http_timeout: Duration) -> Self {
        Self {
            http_timeout,
            reconnect: None,
        }
    }

    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError> {
        if address.starts_with("http://") || address.starts_with("https://") {
            return Ok(Arc::new(HttpTransport::new(address, self.http_timeout)?));
        }
        if address.starts_with("ws://") || address.starts_with("wss://") {
            let transport = match &self.reconnect {
                Some(policy) => WebSocketTransport::connect_resilient(address, policy.clone()).await?,
                None => WebSocketTransport::connect(address).await?,
            };
            return Ok(Arc::new(transport));
        }
        if let Some(command) = address.strip_prefix("stdio:") {
            let mut parts = command.split_whitespace();
            let program = parts
                .next()
                .ok_or_else(|| TransportError::UnsupportedAddress(address.to_string()))?;
            let args: Vec<String> = parts.map(str::to_string).collect();
            return Ok(Arc::new(StreamTransport::spawn(program, &args)?));
        }
        Err(TransportError::UnsupportedAddress(address.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        let connector = DefaultConnector::default();
        for address in ["ftp://example.com", "stdio:", "localhost:8080"] {
            let err = connector.connect(address).await.err().unwrap();
            assert!(matches!(err, TransportError::UnsupportedAddress(_)), "{address}");
        }
    }

    #[tokio::test]
    async fn test_http_address_needs_no_connection() {
        let connector = DefaultConnector::new(Duration::from_secs(1));
        let transport = connector.connect("http://127.0.0.1:9/mcp").await.unwrap();
        assert_eq!(transport.kind(), crate::transport::TransportKind::RequestResponse);
    }
}
