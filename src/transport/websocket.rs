//! WebSocket duplex transport.
//!
//! [`WebSocketTransport`] is the client side (tokio-tungstenite) and may be
//! made resilient: a dropped connection is re-established with the retry
//! policy, then the `initialize` handshake and any live resource
//! subscriptions are replayed. [`WarpWebSocketTransport`] adapts an
//! accepted warp socket for the server.

use {
    super::{Transport, TransportKind},
    crate::{config::RetryPolicy, error::TransportError},
    async_trait::async_trait,
    futures_util::{
        stream::{SplitSink, SplitStream},
        SinkExt, StreamExt,
    },
    serde_json::Value,
    std::collections::BTreeMap,
    tokio::{net::TcpStream, sync::Mutex},
    tokio_tungstenite::{
        connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WebSocketTransport {
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    reconnect: Option<RetryPolicy>,
    replay: parking_lot::Mutex<Replay>,
    closed: CancellationToken,
}

/// Messages replayed after a reconnect so the server sees a fresh,
/// initialized session with the same subscriptions.
#[derive(Debug, Default)]
struct Replay {
    handshake: Vec<String>,
    /// Latest `resources/subscribe` request per uri.
    subscriptions: BTreeMap<String, String>,
}

impl Replay {
    fn record(&mut self, message: &str) {
        let Ok(value) = serde_json::from_str::<Value>(message) else {
            return;
        };
        let uri = || {
            value
                .pointer("/params/uri")
                .and_then(Value::as_str)
                .map(str::to_string)
        };
        match value.get("method").and_then(Value::as_str) {
            Some("initialize") => {
                self.handshake.clear();
                self.subscriptions.clear();
                self.handshake.push(message.to_string());
            }
            Some("notifications/initialized") => self.handshake.push(message.to_string()),
            Some("resources/subscribe") => {
                if let Some(uri) = uri() {
                    self.subscriptions.insert(uri, message.to_string());
                }
            }
            Some("resources/unsubscribe") => {
                if let Some(uri) = uri() {
                    self.subscriptions.remove(&uri);
                }
            }
            _ => {}
        }
    }

    fn messages(&self) -> Vec<String> {
        self.handshake
            .iter()
            .chain(self.subscriptions.values())
            .cloned()
            .collect()
    }
}

impl WebSocketTransport {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        Self::open(url, None).await
    }

    /// Connect and keep reconnecting per `policy` whenever the socket drops.
    pub async fn connect_resilient(url: &str, policy: RetryPolicy) -> Result<Self, TransportError> {
        Self::open(url, Some(policy)).await
    }

    async fn open(url: &str, reconnect: Option<RetryPolicy>) -> Result<Self, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::UnsupportedAddress(url.to_string()));
        }
        let (socket, _) = connect_async(url).await?;
        let (sink, stream) = socket.split();
        debug!(url = %url, resilient = reconnect.is_some(), "WebSocket connected");
        Ok(Self {
            url: url.to_string(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            reconnect,
            replay: parking_lot::Mutex::new(Replay::default()),
            closed: CancellationToken::new(),
        })
    }

    /// Re-establish the socket. Caller holds the stream lock.
    async fn reestablish(
        &self,
        stream: &mut SplitStream<WsStream>,
        policy: &RetryPolicy,
    ) -> bool {
        for attempt in 1..=policy.max_retries.max(1) {
            let delay = policy.delay_for(attempt);
            tokio::select! {
                _ = self.closed.cancelled() => return false,
                _ = tokio::time::sleep(delay) => {}
            }
            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    let (mut new_sink, new_stream) = socket.split();
                    let replay = self.replay.lock().messages();
                    for message in replay {
                        if let Err(e) = new_sink.send(Message::text(message)).await {
                            warn!(error = %e, "Session replay failed");
                        }
                    }
                    *self.sink.lock().await = new_sink;
                    *stream = new_stream;
                    info!(url = %self.url, attempt, "WebSocket reconnected");
                    return true;
                }
                Err(e) => warn!(url = %self.url, attempt, error = %e, "WebSocket reconnect failed"),
            }
        }
        false
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        if self.reconnect.is_some() {
            self.replay.lock().record(&message);
        }
        self.sink.lock().await.send(Message::text(message)).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => {
                    return String::from_utf8(bytes.to_vec())
                        .map(Some)
                        .map_err(|e| TransportError::Framing(e.to_string()));
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {}
                Some(Err(e)) => debug!(error = %e, "WebSocket read failed"),
            }

            // Connection lost.
            match &self.reconnect {
                Some(policy) if !self.closed.is_cancelled() => {
                    if !self.reestablish(&mut stream, policy).await {
                        return Ok(None);
                    }
                }
                _ => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "WebSocket close handshake failed");
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }

    fn is_resilient(&self) -> bool {
        self.reconnect.is_some()
    }
}

/// Server side of an accepted `GET /mcp` upgrade.
pub struct WarpWebSocketTransport {
    sink: Mutex<SplitSink<warp::ws::WebSocket, warp::ws::Message>>,
    stream: Mutex<SplitStream<warp::ws::WebSocket>>,
    closed: CancellationToken,
}

impl WarpWebSocketTransport {
    pub fn new(socket: warp::ws::WebSocket) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: CancellationToken::new(),
        }
    }
}

#[async_trait]
impl Transport for WarpWebSocketTransport {
    async fn send(&self, message: String) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .lock()
            .await
            .send(warp::ws::Message::text(message))
            .await
            .map_err(|e| TransportError::Framing(e.to_string()))
    }

    async fn receive(&self) -> Result<Option<String>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let next = tokio::select! {
                _ = self.closed.cancelled() => return Ok(None),
                next = stream.next() => next,
            };
            match next {
                Some(Ok(msg)) if msg.is_close() => return Ok(None),
                Some(Ok(msg)) => {
                    if let Ok(text) = msg.to_str() {
                        return Ok(Some(text.to_string()));
                    }
                    if msg.is_binary() {
                        return String::from_utf8(msg.into_bytes())
                            .map(Some)
                            .map_err(|e| TransportError::Framing(e.to_string()));
                    }
                    // ping/pong
                }
                Some(Err(e)) => {
                    debug!(error = %e, "WebSocket read failed");
                    return Ok(None);
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();
        if let Err(e) = self.sink.lock().await.close().await {
            debug!(error = %e, "WebSocket close failed");
        }
        Ok(())
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Duplex
    }
}
