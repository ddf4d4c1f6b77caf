use {
    serde::{Deserialize, Serialize},
    serde_json::{json, Value},
    std::{fmt, time::Duration},
    thiserror::Error,
};

/// Closed set of wire error codes.
///
/// Every failure that crosses the wire carries exactly one of these codes;
/// codes outside the set are only ever produced by foreign peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    CapacityExceeded,
    CapabilityNotNegotiated,
}

impl ErrorCode {
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::CapacityExceeded => -32000,
            Self::CapabilityNotNegotiated => -32001,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -32700 => Some(Self::ParseError),
            -32600 => Some(Self::InvalidRequest),
            -32601 => Some(Self::MethodNotFound),
            -32602 => Some(Self::InvalidParams),
            -32603 => Some(Self::InternalError),
            -32000 => Some(Self::CapacityExceeded),
            -32001 => Some(Self::CapabilityNotNegotiated),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[derive(Debug, Error)]
pub enum McpError {
    // Protocol Errors
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    UnknownMethod(String),

    #[error("Capability not negotiated for method: {0}")]
    CapabilityNotNegotiated(String),

    #[error("Not authorized: {0}")]
    Forbidden(String),

    #[error("Server is not accepting requests (state: {0})")]
    NotServing(String),

    // Validation Errors
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Schema validation failed: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    UnknownResource(String),

    #[error("Prompt not found: {0}")]
    UnknownPrompt(String),

    // Execution Errors
    #[error("Tool '{tool}' failed: {cause}")]
    ToolExecution { tool: String, cause: String },

    #[error("Sampling failed: {0}")]
    Sampling(String),

    // Limit Errors
    #[error("Too many sessions (max: {0})")]
    TooManySessions(usize),

    #[error("Message too large: {0} bytes (max: {1})")]
    MessageTooLarge(usize, usize),

    #[error("Too many {kind} registered (max: {limit})")]
    RegistryFull { kind: &'static str, limit: usize },

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // IO Errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    // JSON Errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Wire-level category of this failure. Anything without a declared code
    /// is reported as an internal error.
    pub fn kind(&self) -> ErrorCode {
        match self {
            Self::Parse(_) => ErrorCode::ParseError,
            Self::InvalidRequest(_) | Self::Forbidden(_) | Self::NotServing(_) => {
                ErrorCode::InvalidRequest
            }
            Self::UnknownMethod(_) => ErrorCode::MethodNotFound,
            Self::CapabilityNotNegotiated(_) => ErrorCode::CapabilityNotNegotiated,
            Self::InvalidParams(_)
            | Self::SchemaViolation(_)
            | Self::UnknownTool(_)
            | Self::UnknownResource(_)
            | Self::UnknownPrompt(_) => ErrorCode::InvalidParams,
            Self::TooManySessions(_) | Self::MessageTooLarge(_, _) | Self::RegistryFull { .. } => {
                ErrorCode::CapacityExceeded
            }
            _ => ErrorCode::InternalError,
        }
    }

    /// Convert to JSON-RPC error code
    pub fn error_code(&self) -> i32 {
        self.kind().code()
    }

    /// Structured detail carried in the `data` member of the wire error.
    pub fn data(&self) -> Option<Value> {
        match self {
            Self::SchemaViolation(violations) => Some(json!({ "violations": violations })),
            Self::UnknownTool(name) => Some(json!({ "kind": "not_found", "tool": name })),
            Self::UnknownResource(uri) => Some(json!({ "kind": "not_found", "uri": uri })),
            Self::UnknownPrompt(name) => Some(json!({ "kind": "not_found", "prompt": name })),
            Self::ToolExecution { tool, cause } => Some(json!({
                "category": "execution",
                "tool": tool,
                "cause": cause,
            })),
            Self::Sampling(cause) => Some(json!({ "category": "execution", "cause": cause })),
            Self::CapabilityNotNegotiated(method) => Some(json!({ "method": method })),
            Self::Forbidden(_) => Some(json!({ "kind": "unauthorized" })),
            _ => None,
        }
    }

    pub fn to_error_object(&self) -> ErrorObject {
        ErrorObject {
            code: self.error_code(),
            message: self.to_string(),
            data: self.data(),
        }
    }

    /// Create JSON-RPC error response
    pub fn to_json_rpc_error(&self, id: Option<Value>) -> Value {
        json!({
            "jsonrpc": "2.0",
            "error": self.to_error_object(),
            "id": id,
        })
    }
}

// Result type alias for convenience
pub type McpResult<T> = Result<T, McpError>;

impl From<anyhow::Error> for McpError {
    fn from(err: anyhow::Error) -> Self {
        McpError::Internal(format!("{err:#}"))
    }
}

/// Failures moving encoded messages between peers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Framing error: {0}")]
    Framing(String),

    #[error("Unsupported address: {0}")]
    UnsupportedAddress(String),

    #[error("Connection closed")]
    ConnectionClosed,
}

impl From<tokio_util::codec::LinesCodecError> for TransportError {
    fn from(err: tokio_util::codec::LinesCodecError) -> Self {
        match err {
            tokio_util::codec::LinesCodecError::Io(e) => Self::Io(e),
            other => Self::Framing(other.to_string()),
        }
    }
}

/// An error response received from a remote peer.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub code: i32,
    pub message: String,
    pub data: Option<Value>,
}

impl RemoteError {
    pub fn kind(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }

    pub(crate) fn local(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl From<ErrorObject> for RemoteError {
    fn from(obj: ErrorObject) -> Self {
        Self {
            code: obj.code,
            message: obj.message,
            data: obj.data,
        }
    }
}

/// Client-visible failure, one variant per error category.
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Malformed message, unknown method, capability not negotiated, or a
    /// capacity rejection. Never retried.
    #[error("Protocol error: {0}")]
    Protocol(RemoteError),

    /// Parameters rejected before execution. Never retried.
    #[error("Validation error: {0}")]
    Validation(RemoteError),

    /// The remote tool/prompt/sampling callback failed. Never retried.
    #[error("Execution error: {0}")]
    Execution(RemoteError),

    /// Connection refused, reset, closed, or timed out. Retried locally
    /// before surfacing.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl ClientError {
    /// Categorize an error response by its wire code.
    pub fn from_remote(error: RemoteError) -> Self {
        match error.kind() {
            Some(ErrorCode::InvalidParams) => Self::Validation(error),
            Some(ErrorCode::InternalError) => Self::Execution(error),
            _ => Self::Protocol(error),
        }
    }

    pub(crate) fn timeout(after: Duration) -> Self {
        Self::Connection(format!("request timed out after {}ms", after.as_millis()))
    }

    /// Only transport-class failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// The remote error, when the failure came from the peer.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            Self::Protocol(e) | Self::Validation(e) | Self::Execution(e) => Some(e),
            Self::Connection(_) => None,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        Self::Connection(err.to_string())
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
