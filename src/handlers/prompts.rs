//! Prompt templates.
//!
//! Template text uses `{{ name }}` placeholders. Rendering is a pure
//! function of the template and the supplied arguments.

use {
    super::ChangeFeed,
    crate::{
        error::{McpError, McpResult},
        limits::{check_capacity, ResourceLimits},
        protocol::{
            parse_params,
            types::{
                Content, GetPromptParams, GetPromptResult, ListPromptsResult, PromptArgument,
                PromptInfo, PromptMessage, Role,
            },
            McpMethod, MethodHandler,
        },
        session::RequestContext,
    },
    async_trait::async_trait,
    parking_lot::RwLock,
    serde_json::{Map, Value},
    std::collections::{BTreeMap, HashMap},
    tracing::{info, warn},
};

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub messages: Vec<(Role, String)>,
}

impl PromptTemplate {
    /// A template with a single user message.
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            arguments: Vec::new(),
            messages: vec![(Role::User, body.into())],
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, required: bool) -> Self {
        self.arguments.push(PromptArgument {
            name: name.into(),
            description: None,
            required,
        });
        self
    }

    pub fn with_message(mut self, role: Role, text: impl Into<String>) -> Self {
        self.messages.push((role, text.into()));
        self
    }

    pub fn info(&self) -> PromptInfo {
        PromptInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self.arguments.clone(),
        }
    }

    /// Every placeholder must name a declared argument.
    fn check_placeholders(&self) -> McpResult<()> {
        for (_, text) in &self.messages {
            for placeholder in placeholders(text) {
                if !self.arguments.iter().any(|a| a.name == placeholder) {
                    return Err(McpError::InvalidParams(format!(
                        "prompt '{}' references undeclared parameter '{placeholder}'",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validate caller arguments and render every message.
    pub fn render(&self, arguments: Option<&Map<String, Value>>) -> McpResult<GetPromptResult> {
        let mut values: HashMap<&str, String> = HashMap::new();
        if let Some(arguments) = arguments {
            for (key, value) in arguments {
                if !self.arguments.iter().any(|a| &a.name == key) {
                    return Err(McpError::InvalidParams(format!(
                        "unknown argument '{key}' for prompt '{}'",
                        self.name
                    )));
                }
                let text = match value {
                    Value::Null => continue,
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    Value::Array(_) | Value::Object(_) => {
                        return Err(McpError::InvalidParams(format!(
                            "argument '{key}' must be a string, number or boolean"
                        )))
                    }
                };
                values.insert(key.as_str(), text);
            }
        }
        if let Some(missing) = self
            .arguments
            .iter()
            .find(|a| a.required && !values.contains_key(a.name.as_str()))
        {
            return Err(McpError::InvalidParams(format!(
                "missing required argument '{}' for prompt '{}'",
                missing.name, self.name
            )));
        }

        let messages = self
            .messages
            .iter()
            .map(|(role, text)| PromptMessage {
                role: *role,
                content: Content::text(substitute(text, &values)),
            })
            .collect();
        Ok(GetPromptResult {
            description: self.description.clone(),
            messages,
        })
    }
}

/// Placeholder names in `text`, in order of appearance.
fn placeholders(text: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        names.push(after[..end].trim());
        rest = &after[end + 2..];
    }
    names
}

fn substitute(text: &str, values: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else { break };
        out.push_str(&rest[..start]);
        let name = after[..end].trim();
        if let Some(value) = values.get(name) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    out
}

pub struct PromptHandler {
    templates: RwLock<BTreeMap<String, PromptTemplate>>,
    max_prompts: Option<usize>,
    changes: ChangeFeed,
}

impl PromptHandler {
    pub fn new(limits: &ResourceLimits, changes: ChangeFeed) -> Self {
        Self {
            templates: RwLock::new(BTreeMap::new()),
            max_prompts: limits.max_prompts,
            changes,
        }
    }

    pub fn register(&self, template: PromptTemplate) -> McpResult<()> {
        template.check_placeholders()?;
        let name = template.name.clone();
        {
            let mut templates = self.templates.write();
            if templates.contains_key(&name) {
                warn!(prompt = %name, "Replacing existing prompt template");
            } else {
                check_capacity(templates.len(), self.max_prompts)
                    .map_err(|limit| McpError::RegistryFull { kind: "prompts", limit })?;
            }
            templates.insert(name.clone(), template);
        }
        info!(prompt = %name, "Registered prompt");
        self.changes.publish(McpMethod::PromptsListChanged);
        Ok(())
    }

    pub fn list(&self) -> Vec<PromptInfo> {
        self.templates.read().values().map(PromptTemplate::info).collect()
    }

    pub fn get(&self, name: &str, arguments: Option<&Map<String, Value>>) -> McpResult<GetPromptResult> {
        let templates = self.templates.read();
        let template = templates
            .get(name)
            .ok_or_else(|| McpError::UnknownPrompt(name.to_string()))?;
        template.render(arguments)
    }
}

#[async_trait]
impl MethodHandler for PromptHandler {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> McpResult<Value> {
        match method {
            McpMethod::PromptsList => Ok(serde_json::to_value(ListPromptsResult {
                prompts: self.list(),
            })?),
            McpMethod::PromptsGet => {
                let params: GetPromptParams = parse_params(method, params)?;
                let result = self.get(&params.name, params.arguments.as_ref())?;
                Ok(serde_json::to_value(result)?)
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}
