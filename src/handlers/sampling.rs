//! Sampling: rank offered models by the caller's preferences and forward
//! the request to an injected model invoker.

use {
    crate::{
        error::{McpError, McpResult},
        protocol::{
            parse_params,
            types::{Content, CreateMessageParams, CreateMessageResult, ModelPreferences, Role},
            McpMethod, MethodHandler,
        },
        session::RequestContext,
    },
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    serde_json::Value,
    std::{cmp::Ordering, sync::Arc},
    tracing::debug,
};

const DEFAULT_STOP_REASON: &str = "endTurn";

/// A model the host can run. Scores are in `0.0..=1.0`, higher is better;
/// a high `cost` score means cheap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub name: String,
    pub cost: f64,
    pub speed: f64,
    pub intelligence: f64,
}

impl ModelCandidate {
    pub fn new(name: impl Into<String>, cost: f64, speed: f64, intelligence: f64) -> Self {
        Self {
            name: name.into(),
            cost,
            speed,
            intelligence,
        }
    }

    fn score(&self, prefs: &ModelPreferences) -> f64 {
        prefs.cost_priority.unwrap_or(0.0) * self.cost
            + prefs.speed_priority.unwrap_or(0.0) * self.speed
            + prefs.intelligence_priority.unwrap_or(0.0) * self.intelligence
    }
}

/// What the invoker produced, before normalization.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    /// Empty means "whichever model ranked first".
    pub model: String,
    pub text: String,
    pub stop_reason: Option<String>,
}

#[async_trait]
pub trait ModelInvoker: Send + Sync {
    /// Run the request. `ranked` lists the candidates best first.
    async fn invoke(
        &self,
        ranked: &[ModelCandidate],
        request: &CreateMessageParams,
    ) -> anyhow::Result<ModelReply>;
}

/// Order `candidates`: name hints first (in hint order, case-insensitive
/// substring match), then the rest by weighted priority score. Ties keep
/// the offered order.
pub fn rank_candidates(candidates: &[ModelCandidate], prefs: &ModelPreferences) -> Vec<ModelCandidate> {
    let mut remaining: Vec<ModelCandidate> = candidates.to_vec();
    let mut ranked = Vec::with_capacity(candidates.len());

    for hint in &prefs.hints {
        let hint = hint.name.to_lowercase();
        let (matched, rest): (Vec<_>, Vec<_>) = remaining
            .into_iter()
            .partition(|c| c.name.to_lowercase().contains(&hint));
        ranked.extend(matched);
        remaining = rest;
    }

    remaining.sort_by(|a, b| {
        b.score(prefs)
            .partial_cmp(&a.score(prefs))
            .unwrap_or(Ordering::Equal)
    });
    ranked.extend(remaining);
    ranked
}

pub struct SamplingHandler {
    candidates: Vec<ModelCandidate>,
    invoker: Arc<dyn ModelInvoker>,
}

impl SamplingHandler {
    pub fn new(candidates: Vec<ModelCandidate>, invoker: Arc<dyn ModelInvoker>) -> Self {
        Self { candidates, invoker }
    }

    pub async fn create_message(&self, request: CreateMessageParams) -> McpResult<CreateMessageResult> {
        if request.messages.is_empty() {
            return Err(McpError::InvalidParams("messages must not be empty".to_string()));
        }
        if request.max_tokens == 0 {
            return Err(McpError::InvalidParams("maxTokens must be positive".to_string()));
        }

        let prefs = request.model_preferences.clone().unwrap_or_default();
        let ranked = rank_candidates(&self.candidates, &prefs);
        debug!(
            candidates = ?ranked.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Ranked sampling candidates"
        );

        let reply = self
            .invoker
            .invoke(&ranked, &request)
            .await
            .map_err(|e| McpError::Sampling(format!("{e:#}")))?;

        let model = if reply.model.is_empty() {
            ranked
                .first()
                .map(|c| c.name.clone())
                .unwrap_or_else(|| "unknown".to_string())
        } else {
            reply.model
        };
        Ok(CreateMessageResult {
            role: Role::Assistant,
            content: Content::text(reply.text),
            model,
            stop_reason: reply
                .stop_reason
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| DEFAULT_STOP_REASON.to_string()),
        })
    }
}

#[async_trait]
impl MethodHandler for SamplingHandler {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        _ctx: &RequestContext,
    ) -> McpResult<Value> {
        match method {
            McpMethod::SamplingCreateMessage => {
                let request: CreateMessageParams = parse_params(method, params)?;
                Ok(serde_json::to_value(self.create_message(request).await?)?)
            }
            other => Err(McpError::UnknownMethod(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::{ModelHint, SamplingMessage};

    fn candidates() -> Vec<ModelCandidate> {
        vec![
            ModelCandidate::new("small-fast", 0.9, 0.9, 0.3),
            ModelCandidate::new("large-smart", 0.2, 0.3, 0.95),
            ModelCandidate::new("medium", 0.6, 0.6, 0.6),
        ]
    }

    struct FirstChoice;

    #[async_trait]
    impl ModelInvoker for FirstChoice {
        async fn invoke(
            &self,
            ranked: &[ModelCandidate],
            request: &CreateMessageParams,
        ) -> anyhow::Result<ModelReply> {
            Ok(ModelReply {
                model: String::new(),
                text: format!("{} answered {} messages", ranked[0].name, request.messages.len()),
                stop_reason: None,
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl ModelInvoker for Broken {
        async fn invoke(
            &self,
            _ranked: &[ModelCandidate],
            _request: &CreateMessageParams,
        ) -> anyhow::Result<ModelReply> {
            anyhow::bail!("model overloaded")
        }
    }

    fn request(prefs: Option<ModelPreferences>) -> CreateMessageParams {
        CreateMessageParams {
            messages: vec![SamplingMessage {
                role: Role::User,
                content: Content::text("hello"),
            }],
            model_preferences: prefs,
            system_prompt: None,
            max_tokens: 64,
            temperature: None,
            stop_sequences: Vec::new(),
        }
    }

    #[test]
    fn test_hints_take_precedence() {
        let prefs = ModelPreferences {
            hints: vec![ModelHint { name: "MEDIUM".into() }],
            intelligence_priority: Some(1.0),
            ..Default::default()
        };
        let ranked = rank_candidates(&candidates(), &prefs);
        let names: Vec<_> = ranked.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["medium", "large-smart", "small-fast"]);
    }

    #[test]
    fn test_priorities_order_the_rest() {
        let prefs = ModelPreferences {
            speed_priority: Some(1.0),
            ..Default::default()
        };
        let ranked = rank_candidates(&candidates(), &prefs);
        assert_eq!(ranked[0].name, "small-fast");
        // No preferences at all keeps the offered order
        let ranked = rank_candidates(&candidates(), &ModelPreferences::default());
        assert_eq!(ranked[0].name, "small-fast");
        assert_eq!(ranked[2].name, "medium");
    }

    #[tokio::test]
    async fn test_response_is_normalized() {
        let handler = SamplingHandler::new(candidates(), Arc::new(FirstChoice));
        let prefs = ModelPreferences {
            intelligence_priority: Some(1.0),
            ..Default::default()
        };
        let result = handler.create_message(request(Some(prefs))).await.unwrap();
        assert_eq!(result.role, Role::Assistant);
        assert_eq!(result.model, "large-smart");
        assert_eq!(result.stop_reason, "endTurn");
        assert_eq!(result.content.as_text(), "large-smart answered 1 messages");
    }

    #[tokio::test]
    async fn test_invalid_requests_and_failures() {
        let handler = SamplingHandler::new(candidates(), Arc::new(FirstChoice));
        let mut empty = request(None);
        empty.messages.clear();
        assert!(matches!(
            handler.create_message(empty).await,
            Err(McpError::InvalidParams(_))
        ));
        let mut zero = request(None);
        zero.max_tokens = 0;
        assert!(matches!(
            handler.create_message(zero).await,
            Err(McpError::InvalidParams(_))
        ));

        let broken = SamplingHandler::new(candidates(), Arc::new(Broken));
        let err = broken.create_message(request(None)).await.unwrap_err();
        assert!(matches!(err, McpError::Sampling(ref cause) if cause.contains("overloaded")));
        assert_eq!(err.error_code(), -32603);
    }
}
