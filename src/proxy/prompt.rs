//! Remote prompts. Definitions are fetched once and used to check
//! arguments locally before a render goes to the server.

use {
    super::pool::ConnectionPool,
    crate::{
        error::{ClientError, ClientResult, ErrorCode, RemoteError},
        protocol::{
            types::{GetPromptResult, PromptInfo},
            McpMethod,
        },
    },
    parking_lot::RwLock,
    serde_json::{Map, Value},
    std::{collections::HashMap, sync::Arc},
    tracing::debug,
};

/// Remote prompt templates. Definitions are cached until
/// [`invalidate`](Self::invalidate); rendered output never is.
pub struct McpPromptProxy {
    address: String,
    name: String,
    pool: Arc<ConnectionPool>,
    definitions: RwLock<Option<HashMap<String, PromptInfo>>>,
}

impl McpPromptProxy {
    pub(crate) fn new(address: &str, name: &str, pool: Arc<ConnectionPool>) -> Self {
        Self {
            address: address.to_string(),
            name: name.to_string(),
            pool,
            definitions: RwLock::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn list(&self) -> ClientResult<Vec<PromptInfo>> {
        if let Some(definitions) = self.definitions.read().as_ref() {
            let mut prompts: Vec<PromptInfo> = definitions.values().cloned().collect();
            prompts.sort_by(|a, b| a.name.cmp(&b.name));
            return Ok(prompts);
        }
        let prompts = self.refresh().await?;
        Ok(prompts)
    }

    /// Render `name` remotely after checking `arguments` against the cached
    /// definition. An unknown name triggers one refresh of the definitions.
    pub async fn render(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> ClientResult<GetPromptResult> {
        let definition = match self.definition(name) {
            Some(definition) => definition,
            None => {
                debug!(prompt = %name, "Prompt not cached, refreshing definitions");
                self.refresh().await?;
                self.definition(name).ok_or_else(|| {
                    validation_error(format!("Prompt not found: {name}"))
                })?
            }
        };
        check_arguments(&definition, arguments.as_ref())?;

        let client = self.pool.get(&self.address).await?;
        client.get_prompt(name, arguments).await
    }

    pub fn invalidate(&self) {
        *self.definitions.write() = None;
    }

    fn definition(&self, name: &str) -> Option<PromptInfo> {
        self.definitions.read().as_ref()?.get(name).cloned()
    }

    async fn refresh(&self) -> ClientResult<Vec<PromptInfo>> {
        let client = self.pool.get(&self.address).await?;
        client.invalidate_listing(McpMethod::PromptsList);
        let prompts = client.list_prompts().await?;
        *self.definitions.write() = Some(
            prompts
                .iter()
                .map(|p| (p.name.clone(), p.clone()))
                .collect(),
        );
        Ok(prompts)
    }
}

fn validation_error(message: String) -> ClientError {
    ClientError::Validation(RemoteError::local(ErrorCode::InvalidParams, message))
}

fn check_arguments(definition: &PromptInfo, arguments: Option<&Map<String, Value>>) -> ClientResult<()> {
    if let Some(arguments) = arguments {
        if let Some(unknown) = arguments
            .keys()
            .find(|key| !definition.arguments.iter().any(|a| &a.name == *key))
        {
            return Err(validation_error(format!(
                "unknown argument '{unknown}' for prompt '{}'",
                definition.name
            )));
        }
    }
    let supplied = |name: &str| {
        arguments
            .and_then(|args| args.get(name))
            .is_some_and(|v| !v.is_null())
    };
    if let Some(missing) = definition
        .arguments
        .iter()
        .find(|a| a.required && !supplied(&a.name))
    {
        return Err(validation_error(format!(
            "missing required argument '{}' for prompt '{}'",
            missing.name, definition.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::PromptArgument;
    use serde_json::json;

    fn greeting() -> PromptInfo {
        PromptInfo {
            name: "greet".into(),
            description: None,
            arguments: vec![
                PromptArgument {
                    name: "who".into(),
                    description: None,
                    required: true,
                },
                PromptArgument {
                    name: "mood".into(),
                    description: None,
                    required: false,
                },
            ],
        }
    }

    #[test]
    fn test_local_argument_checks() {
        let def = greeting();
        let args = |v: Value| v.as_object().cloned().unwrap();
        assert!(check_arguments(&def, Some(&args(json!({"who": "ada"})))).is_ok());

        let err = check_arguments(&def, Some(&args(json!({"who": "ada", "extra": 1})))).unwrap_err();
        assert!(matches!(err, ClientError::Validation(ref e) if e.message.contains("'extra'")));

        let err = check_arguments(&def, None).unwrap_err();
        assert!(matches!(err, ClientError::Validation(ref e) if e.message.contains("'who'")));
        assert_eq!(err.remote().unwrap().code, -32602);
    }
}
