//! MCP Protocol Core
//!
//! Message envelope, the closed method set, typed parameters and the
//! dispatcher that routes decoded requests to bound handlers.

pub mod dispatcher;
pub mod message;
pub mod method;
pub mod types;

pub use {
    dispatcher::{fn_handler, Authorizer, Dispatcher, FnHandler, MethodHandler},
    message::{
        parse_params, Message, Notification, Outcome, RawMessage, Rejected, Request, RequestId,
        Response, JSONRPC_VERSION,
    },
    method::{McpMethod, UnknownMethod},
};

/// Protocol revision a server answers with when the client asks for one it
/// does not know.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

pub const SUPPORTED_PROTOCOL_VERSIONS: [&str; 2] = ["2025-03-26", "2025-06-18"];

/// Pick the revision to speak: the requested one when supported, otherwise
/// the latest this implementation knows.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}
