//! Transport abstraction
//!
//! A transport moves encoded messages between two peers and knows nothing
//! about their content. Three variants share one interface:
//!
//! - [`StreamTransport`]: line or length-delimited framing over a byte
//!   stream (stdio, child process pipes, in-memory duplex)
//! - [`HttpTransport`]: one HTTP exchange per message
//! - [`WebSocketTransport`]: long-lived duplex connection that can carry
//!   unsolicited server notifications

pub mod http;
pub mod stream;
pub mod websocket;

pub use {
    http::HttpTransport,
    stream::{FrameCodec, StreamTransport},
    websocket::{WarpWebSocketTransport, WebSocketTransport},
};

use {crate::error::TransportError, async_trait::async_trait, std::fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Pipe,
    RequestResponse,
    Duplex,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Pipe => write!(f, "pipe"),
            TransportKind::RequestResponse => write!(f, "http"),
            TransportKind::Duplex => write!(f, "websocket"),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one encoded message.
    async fn send(&self, message: String) -> Result<(), TransportError>;

    /// Next encoded message, or `None` at end of stream.
    async fn receive(&self) -> Result<Option<String>, TransportError>;

    /// Release the connection. Calling it again is a no-op.
    async fn close(&self) -> Result<(), TransportError>;

    fn kind(&self) -> TransportKind;

    /// Whether several calls may be outstanding at once, answered in any
    /// order.
    fn is_multiplexed(&self) -> bool {
        self.kind() == TransportKind::Duplex
    }

    /// Resilient transports reconnect on their own; others report a lost
    /// connection as end of stream.
    fn is_resilient(&self) -> bool {
        false
    }
}
