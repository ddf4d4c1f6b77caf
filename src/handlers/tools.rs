//! Tool registry and execution.

use {
    super::ChangeFeed,
    crate::{
        error::{McpError, McpResult},
        limits::{check_capacity, ResourceLimits},
        logging,
        protocol::{
            parse_params,
            types::{CallToolParams, CallToolResult, ListToolsResult, ToolSpec},
            McpMethod, MethodHandler,
        },
        session::RequestContext,
        validation,
    },
    async_trait::async_trait,
    chrono::{DateTime, Utc},
    parking_lot::{Mutex, RwLock},
    schemars::JsonSchema,
    serde::{de::DeserializeOwned, Serialize},
    serde_json::Value,
    std::{
        collections::{BTreeMap, HashMap, VecDeque},
        future::Future,
        sync::Arc,
        time::Instant,
    },
    tracing::{info, warn},
};

/// The callback run when a tool is exercised.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, arguments: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolExecutor for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Value>> + Send,
{
    async fn execute(&self, arguments: Value) -> anyhow::Result<Value> {
        self(arguments).await
    }
}

/// One completed execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub tool: String,
    pub arguments: Value,
    pub outcome: Result<Value, String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

struct RegisteredTool {
    spec: ToolSpec,
    executor: Arc<dyn ToolExecutor>,
}

pub struct ToolHandler {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    history: Mutex<HashMap<String, VecDeque<ExecutionRecord>>>,
    max_tools: Option<usize>,
    max_history: usize,
    changes: ChangeFeed,
}

impl ToolHandler {
    pub fn new(limits: &ResourceLimits, changes: ChangeFeed) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            history: Mutex::new(HashMap::new()),
            max_tools: limits.max_tools,
            max_history: limits.max_history,
            changes,
        }
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        self.tools.read().values().map(|t| t.spec.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Register `spec`, replacing any tool with the same name.
    pub fn register(&self, spec: ToolSpec, executor: Arc<dyn ToolExecutor>) -> McpResult<()> {
        let name = spec.name.clone();
        {
            let mut tools = self.tools.write();
            if tools.contains_key(&name) {
                warn!(tool = %name, "Replacing existing tool registration");
            } else {
                check_capacity(tools.len(), self.max_tools)
                    .map_err(|limit| McpError::RegistryFull { kind: "tools", limit })?;
            }
            tools.insert(name.clone(), RegisteredTool { spec, executor });
        }
        info!(tool = %name, "Registered tool");
        self.changes.publish(McpMethod::ToolsListChanged);
        Ok(())
    }

    /// Register a tool whose input and output schemas come from Rust types.
    ///
    /// Arguments are validated against `I`'s schema before `f` runs, then
    /// deserialized into `I`; the returned `O` is serialized as the result.
    pub fn register_typed<I, O, F, Fut>(&self, name: &str, description: &str, f: F) -> McpResult<()>
    where
        I: JsonSchema + DeserializeOwned + Send + 'static,
        O: JsonSchema + Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        let spec = ToolSpec::from_schema::<I>(name, description)?.with_output_type::<O>()?;
        let f = Arc::new(f);
        let executor = move |arguments: Value| {
            let f = Arc::clone(&f);
            async move {
                let input: I = serde_json::from_value(arguments)?;
                let output = f(input).await?;
                Ok::<Value, anyhow::Error>(serde_json::to_value(output)?)
            }
        };
        self.register(spec, Arc::new(executor))
    }

    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.tools.write().remove(name).is_some();
        if removed {
            self.history.lock().remove(name);
            self.changes.publish(McpMethod::ToolsListChanged);
        }
        removed
    }

    /// Validate `arguments`, run the executor and check its result.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> McpResult<CallToolResult> {
        let (spec, executor) = {
            let tools = self.tools.read();
            let tool = tools
                .get(name)
                .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
            (tool.spec.clone(), Arc::clone(&tool.executor))
        };

        let arguments = arguments.unwrap_or_else(|| Value::Object(Default::default()));
        validation::validate(&spec.input_schema, &arguments).map_err(McpError::SchemaViolation)?;

        logging::log_tool_call(name, &arguments);
        let timestamp = Utc::now();
        let start = Instant::now();
        let result = executor
            .execute(arguments.clone())
            .await
            .map_err(|e| format!("{e:#}"))
            .and_then(|value| match &spec.output_schema {
                Some(schema) => validation::validate(schema, &value)
                    .map(|_| value)
                    .map_err(|violations| {
                        format!("result does not match output schema: {}", violations.join("; "))
                    }),
                None => Ok(value),
            });
        let elapsed = start.elapsed();
        logging::log_tool_finished(name, elapsed, result.as_ref().err().map(String::as_str));

        self.record(ExecutionRecord {
            tool: name.to_string(),
            arguments,
            outcome: result.clone(),
            timestamp,
            duration_ms: elapsed.as_millis() as u64,
        });

        result
            .map(CallToolResult::from_value)
            .map_err(|cause| McpError::ToolExecution {
                tool: name.to_string(),
                cause,
            })
    }

    fn record(&self, entry: ExecutionRecord) {
        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.lock();
        let entries = history.entry(entry.tool.clone()).or_default();
        if entries.len() >= self.max_history {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Retained executions of `name`, oldest first.
    pub fn history(&self, name: &str) -> Vec<ExecutionRecord> {
        self.history
            .lock()
            .get(name)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MethodHandler for ToolHandler {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> McpResult<Value> {
        match method {
            McpMethod::ToolsList => Ok(serde_json::to_value(ListToolsResult { tools: self.list() })?),
            McpMethod::ToolsCall => {
                let params: CallToolParams = parse_params(method, params)?;
                let result = self.call(&params.name, params.arguments).await?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}
