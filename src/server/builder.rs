//! Fluent construction of an [`McpServer`].

use {
    super::{LifecycleHandler, McpServer, ServerInner},
    crate::{
        capabilities::{CapabilityGroup, CapabilitySet},
        config::ServerConfig,
        error::{McpError, McpResult},
        handlers::{
            ChangeFeed, ModelCandidate, ModelInvoker, PromptHandler, PromptTemplate,
            ResourceHandler, SamplingHandler, ToolExecutor, ToolHandler,
        },
        health::HealthChecker,
        limits::ResourceLimits,
        protocol::{
            types::{Implementation, ResourceDescriptor, ToolSpec},
            Authorizer, Dispatcher, McpMethod, MethodHandler,
        },
        session::SessionRegistry,
    },
    schemars::JsonSchema,
    serde::{de::DeserializeOwned, Serialize},
    std::{future::Future, sync::Arc, time::Duration},
    tracing::info,
};

/// Builder for [`McpServer`].
///
/// Registration failures (duplicate limits exceeded, bad templates) are
/// remembered and returned from [`build`](Self::build), so calls chain.
///
/// ```rust,no_run
/// use mcpmesh::{McpServerBuilder, protocol::types::ToolSpec};
/// use serde_json::{json, Value};
/// use std::sync::Arc;
///
/// # async fn run() -> mcpmesh::McpResult<()> {
/// let server = McpServerBuilder::new("echo-server", "1.0.0")
///     .with_tool(
///         ToolSpec::new("echo", "Echo text", json!({
///             "type": "object",
///             "properties": {"text": {"type": "string"}},
///             "required": ["text"]
///         })),
///         Arc::new(|args: Value| async move { Ok::<_, anyhow::Error>(args["text"].clone()) }),
///     )
///     .build()?;
/// server.serve_stdio().await
/// # }
/// ```
pub struct McpServerBuilder {
    config: ServerConfig,
    changes: ChangeFeed,
    tools: Vec<(ToolSpec, Arc<dyn ToolExecutor>)>,
    typed_tools: Vec<Box<dyn FnOnce(&ToolHandler) -> McpResult<()> + Send>>,
    resources: Vec<(ResourceDescriptor, String)>,
    prompts: Vec<PromptTemplate>,
    sampling: Option<(Vec<ModelCandidate>, Arc<dyn ModelInvoker>)>,
    overrides: Vec<(McpMethod, Arc<dyn MethodHandler>)>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl McpServerBuilder {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self::from_config(ServerConfig {
            name: name.into(),
            version: version.into(),
            ..ServerConfig::default()
        })
    }

    pub fn from_config(config: ServerConfig) -> Self {
        Self {
            config,
            changes: ChangeFeed::new(),
            tools: Vec::new(),
            typed_tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            sampling: None,
            overrides: Vec::new(),
            authorizer: None,
        }
    }

    /// Feature groups to offer. Sampling is only offered when a sampling
    /// handler is configured.
    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.config.capabilities = capabilities;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.config.limits = limits;
        self
    }

    /// `None` disables idle expiry of HTTP sessions.
    pub fn with_session_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.session_idle_timeout = timeout;
        self
    }

    pub fn with_tool(mut self, spec: ToolSpec, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tools.push((spec, executor));
        self
    }

    pub fn with_typed_tool<I, O, F, Fut>(mut self, name: &str, description: &str, f: F) -> Self
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        O: JsonSchema + Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let name = name.to_string();
        let description = description.to_string();
        self.typed_tools.push(Box::new(move |tools: &ToolHandler| {
            tools.register_typed(&name, &description, f)
        }));
        self
    }

    pub fn with_resource(mut self, descriptor: ResourceDescriptor, text: impl Into<String>) -> Self {
        self.resources.push((descriptor, text.into()));
        self
    }

    pub fn with_prompt(mut self, template: PromptTemplate) -> Self {
        self.prompts.push(template);
        self
    }

    pub fn with_sampling(mut self, candidates: Vec<ModelCandidate>, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.sampling = Some((candidates, invoker));
        self
    }

    /// Bind a custom handler for `method`, replacing the built-in one.
    pub fn with_handler(mut self, method: McpMethod, handler: Arc<dyn MethodHandler>) -> Self {
        self.overrides.push((method, handler));
        self
    }

    /// Consulted for every feature-group call. Lifecycle methods are not
    /// gated.
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn build(self) -> McpResult<McpServer> {
        let limits = &self.config.limits;
        let tools = Arc::new(ToolHandler::new(limits, self.changes.clone()));
        let resources = Arc::new(ResourceHandler::new(limits, self.changes.clone()));
        let prompts = Arc::new(PromptHandler::new(limits, self.changes.clone()));

        for (spec, executor) in self.tools {
            tools.register(spec, executor)?;
        }
        for register in self.typed_tools {
            register(&tools)?;
        }
        for (descriptor, text) in self.resources {
            resources.register(descriptor, text)?;
        }
        for template in self.prompts {
            prompts.register(template)?;
        }
        let sampling = self
            .sampling
            .map(|(candidates, invoker)| Arc::new(SamplingHandler::new(candidates, invoker)));

        let mut capabilities = self.config.capabilities;
        if sampling.is_none() {
            capabilities = capabilities.without(CapabilityGroup::Sampling);
        }

        let info = Implementation {
            name: self.config.name.clone(),
            version: self.config.version.clone(),
        };
        let mut dispatcher = Dispatcher::new(limits.max_message_size);
        if let Some(authorizer) = self.authorizer {
            dispatcher.set_authorizer(authorizer);
        }
        let lifecycle_handler: Arc<dyn MethodHandler> =
            Arc::new(LifecycleHandler::new(capabilities, info));
        for method in [
            McpMethod::Initialize,
            McpMethod::Ping,
            McpMethod::Initialized,
            McpMethod::Cancelled,
        ] {
            dispatcher.register_handler(method, lifecycle_handler.clone());
        }
        for method in [McpMethod::ToolsList, McpMethod::ToolsCall] {
            dispatcher.register_handler(method, tools.clone());
        }
        for method in [
            McpMethod::ResourcesList,
            McpMethod::ResourcesRead,
            McpMethod::ResourcesSubscribe,
            McpMethod::ResourcesUnsubscribe,
        ] {
            dispatcher.register_handler(method, resources.clone());
        }
        for method in [McpMethod::PromptsList, McpMethod::PromptsGet] {
            dispatcher.register_handler(method, prompts.clone());
        }
        if let Some(sampling) = &sampling {
            dispatcher.register_handler(McpMethod::SamplingCreateMessage, sampling.clone());
        }
        for (method, handler) in self.overrides {
            if method.is_notification() && !matches!(method, McpMethod::Initialized | McpMethod::Cancelled) {
                return Err(McpError::InvalidRequest(format!(
                    "'{method}' is sent by servers and cannot be handled"
                )));
            }
            dispatcher.register_handler(method, handler);
        }

        info!(
            server = %self.config.name,
            tools = tools.list().len(),
            resources = resources.list().len(),
            prompts = prompts.list().len(),
            sampling = sampling.is_some(),
            "Built MCP server"
        );

        Ok(McpServer {
            inner: Arc::new(ServerInner {
                health: HealthChecker::new(&self.config.name, &self.config.version),
                sessions: SessionRegistry::new(self.config.limits.max_sessions),
                config: self.config,
                capabilities,
                dispatcher,
                lifecycle: Arc::default(),
                tools,
                resources,
                prompts,
                sampling,
                changes: self.changes,
            }),
        })
    }
}
