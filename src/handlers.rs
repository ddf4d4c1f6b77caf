//! Server feature handlers
//!
//! One handler per capability group, each owning that group's state. Every
//! handler also implements [`MethodHandler`](crate::protocol::MethodHandler)
//! for the methods of its group, so the server binds them directly.

pub mod prompts;
pub mod resources;
pub mod sampling;
pub mod tools;

pub use {
    prompts::{PromptHandler, PromptTemplate},
    resources::ResourceHandler,
    sampling::{ModelCandidate, ModelInvoker, ModelReply, SamplingHandler},
    tools::{ExecutionRecord, ToolExecutor, ToolHandler},
};

use {crate::protocol::McpMethod, tokio::sync::broadcast};

/// Fan-out of `*/list_changed` events from handlers to live connections.
#[derive(Debug, Clone)]
pub struct ChangeFeed(broadcast::Sender<McpMethod>);

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self(tx)
    }

    /// Nobody listening (no connections yet) is not an error.
    pub fn publish(&self, method: McpMethod) {
        let _ = self.0.send(method);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<McpMethod> {
        self.0.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}
