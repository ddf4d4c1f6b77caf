//! Test helpers for integration tests
//!
//! Servers wired to clients over in-memory pipes, plus a connector that
//! resolves addresses to in-process servers so proxies and the manager can
//! be exercised without sockets.

#![allow(dead_code)]

use {
    async_trait::async_trait,
    mcpmesh::{
        config::{ClientConfig, RetryPolicy},
        handlers::PromptTemplate,
        protocol::types::{ResourceDescriptor, ToolSpec},
        proxy::Connector,
        transport::{FrameCodec, StreamTransport, Transport},
        McpServer, McpServerBuilder, TransportError,
    },
    parking_lot::Mutex,
    serde_json::{json, Value},
    std::{
        collections::HashMap,
        net::SocketAddr,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Once,
        },
        time::Duration,
    },
    tokio::{
        net::{TcpListener, TcpStream},
        task::JoinHandle,
    },
};

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per test binary. `RUST_LOG`
/// controls verbosity.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Server-side counters for observing remote work.
#[derive(Debug, Clone, Default)]
pub struct Counters {
    pub echo: Arc<AtomicUsize>,
    pub fail: Arc<AtomicUsize>,
}

impl Counters {
    pub fn echo_calls(&self) -> usize {
        self.echo.load(Ordering::SeqCst)
    }

    pub fn fail_calls(&self) -> usize {
        self.fail.load(Ordering::SeqCst)
    }
}

fn echo_spec() -> ToolSpec {
    ToolSpec::new(
        "echo",
        "Echo text",
        json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        }),
    )
}

/// `echo` tool, a `fail` tool that always errors, one text resource and a
/// `greet` prompt.
pub fn test_server(name: &str) -> (McpServer, Counters) {
    let counters = Counters::default();
    let echo = counters.echo.clone();
    let fail = counters.fail.clone();
    let server = McpServerBuilder::new(name, "1.0.0")
        .with_tool(
            echo_spec(),
            Arc::new(move |args: Value| {
                let echo = echo.clone();
                async move {
                    echo.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(json!({"text": args["text"]}))
                }
            }),
        )
        .with_tool(
            ToolSpec::new("fail", "Always fails", json!({"type": "object"})),
            Arc::new(move |_args: Value| {
                let fail = fail.clone();
                async move {
                    fail.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(anyhow::anyhow!("backend unavailable"))
                }
            }),
        )
        .with_resource(
            ResourceDescriptor::new("file://notes.txt", "notes").with_mime_type("text/plain"),
            "first draft",
        )
        .with_prompt(
            PromptTemplate::new("greet", "Hello {{who}}, you seem {{mood}}.")
                .with_description("Greets someone")
                .with_argument("who", true)
                .with_argument("mood", false),
        )
        .build()
        .unwrap();
    (server, counters)
}

/// Like [`test_server`] but `echo` always fails, for failover tests.
pub fn broken_echo_server(name: &str) -> (McpServer, Counters) {
    let counters = Counters::default();
    let echo = counters.echo.clone();
    let server = McpServerBuilder::new(name, "1.0.0")
        .with_tool(
            echo_spec(),
            Arc::new(move |_args: Value| {
                let echo = echo.clone();
                async move {
                    echo.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(anyhow::anyhow!("echo is broken here"))
                }
            }),
        )
        .build()
        .unwrap();
    (server, counters)
}

/// Serve `server` over a fresh in-memory pipe and return the client end.
pub fn serve_in_memory(server: &McpServer) -> Arc<dyn Transport> {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let (a_read, a_write) = tokio::io::split(a);
    let (b_read, b_write) = tokio::io::split(b);
    let server_end: Arc<dyn Transport> =
        Arc::new(StreamTransport::new(a_read, a_write, FrameCodec::Lines));
    let server = server.clone();
    tokio::spawn(async move {
        let _ = server.serve(server_end).await;
    });
    Arc::new(StreamTransport::new(b_read, b_write, FrameCodec::Lines))
}

/// Client settings for tests: short timeout, quick bounded retries.
pub fn fast_client_config() -> ClientConfig {
    ClientConfig {
        request_timeout: Duration::from_secs(2),
        retry: RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: false,
        },
        ..ClientConfig::default()
    }
}

/// Resolves `mem://<name>` addresses to registered in-process servers.
/// Unknown addresses fail like a refused connection.
#[derive(Default)]
pub struct InMemoryConnector {
    servers: Mutex<HashMap<String, McpServer>>,
    connects: AtomicUsize,
}

impl InMemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, address: &str, server: McpServer) {
        self.servers.lock().insert(address.to_string(), server);
    }

    pub fn unregister(&self, address: &str) {
        self.servers.lock().remove(address);
    }

    /// Connections opened so far.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self, address: &str) -> Result<Arc<dyn Transport>, TransportError> {
        let server = self.servers.lock().get(address).cloned();
        let Some(server) = server else {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("nothing listening at {address}"),
            )));
        };
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(serve_in_memory(&server))
    }
}

/// TCP relay in front of a listener. Cutting it drops every relayed
/// connection while new ones are still accepted, which looks to both ends
/// like a network failure.
pub struct Relay {
    local_addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
    acceptor: JoinHandle<()>,
}

impl Relay {
    pub async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local_addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let links: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let acceptor = {
            let accepted = accepted.clone();
            let links = links.clone();
            tokio::spawn(async move {
                while let Ok((mut inbound, _)) = listener.accept().await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                    let link = tokio::spawn(async move {
                        if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                            let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                        }
                    });
                    links.lock().push(link);
                }
            })
        };

        Self {
            local_addr,
            accepted,
            links,
            acceptor,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/mcp", self.local_addr)
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Drop every live relayed connection.
    pub fn cut(&self) {
        for link in self.links.lock().drain(..) {
            link.abort();
        }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.acceptor.abort();
        self.cut();
    }
}

/// Poll `condition` every few milliseconds, failing after two seconds.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}
