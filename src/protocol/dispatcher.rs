//! Method dispatch
//!
//! Maps the closed [`McpMethod`] set to handler implementations. The table
//! is filled before serving and only read afterwards.

use {
    super::{
        message::{Message, Response},
        method::McpMethod,
        RequestId,
    },
    crate::{
        error::{McpError, McpResult},
        logging,
        session::{RequestContext, Session},
    },
    async_trait::async_trait,
    serde_json::Value,
    std::{collections::HashMap, future::Future, sync::Arc, time::Instant},
    tracing::{debug, warn, Instrument},
};

/// Server-side implementation of one or more methods.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn handle(
        &self,
        method: McpMethod,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> McpResult<Value>;
}

/// Access decision taken after capability gating and before the handler
/// runs. Credentials are out of band; implementations read whatever the
/// session recorded at `initialize`.
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn authorize(&self, method: McpMethod, ctx: &RequestContext) -> McpResult<()>;
}

/// Adapter binding an async closure as a [`MethodHandler`].
pub struct FnHandler<F>(F);

pub fn fn_handler<F, Fut>(f: F) -> Arc<FnHandler<F>>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    Arc::new(FnHandler(f))
}

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(Option<Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<Value>> + Send,
{
    async fn handle(
        &self,
        _method: McpMethod,
        params: Option<Value>,
        ctx: &RequestContext,
    ) -> McpResult<Value> {
        (self.0)(params, ctx.clone()).await
    }
}

pub struct Dispatcher {
    handlers: HashMap<McpMethod, Arc<dyn MethodHandler>>,
    authorizer: Option<Arc<dyn Authorizer>>,
    max_message_size: usize,
}

impl Dispatcher {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            handlers: HashMap::new(),
            authorizer: None,
            max_message_size,
        }
    }

    pub fn set_authorizer(&mut self, authorizer: Arc<dyn Authorizer>) {
        self.authorizer = Some(authorizer);
    }

    /// Bind `handler` to `method`, replacing any previous binding.
    pub fn register_handler(&mut self, method: McpMethod, handler: Arc<dyn MethodHandler>) {
        if self.handlers.insert(method, handler).is_some() {
            warn!(method = %method, "Replacing existing handler binding");
        }
    }

    pub fn has_handler(&self, method: McpMethod) -> bool {
        self.handlers.contains_key(&method)
    }

    /// Process one encoded message for `session`.
    ///
    /// Returns the encoded response, or `None` for notifications and for
    /// responses arriving from the peer.
    pub async fn dispatch(&self, raw: &[u8], session: &Arc<Session>) -> Option<String> {
        logging::log_message_received(raw.len());

        if raw.len() > self.max_message_size {
            let err = McpError::MessageTooLarge(raw.len(), self.max_message_size);
            warn!(error = %err, "Rejecting oversized message");
            return Some(encode(Response::failure(None, err.to_error_object())));
        }

        let (id, method, params) = match Message::parse(raw) {
            Ok(Message::Request(req)) => (Some(req.id), req.method, req.params),
            Ok(Message::Notification(note)) => (None, note.method, note.params),
            Ok(Message::Response(resp)) => {
                debug!(id = ?resp.id, "Ignoring response sent to server");
                return None;
            }
            Err(rejected) => {
                logging::log_parse_error(&rejected.error.to_string(), raw.len());
                return Some(encode(rejected.to_response()));
            }
        };
        let id_text = id.as_ref().map(RequestId::to_string);
        logging::log_message_parsed(&method, id_text.as_deref());

        let span = logging::request_span(&method, id_text.as_deref(), &session.id().to_string());
        let result = self
            .invoke(&method, params, RequestContext::new(session.clone(), id.clone()))
            .instrument(span)
            .await;

        let id = id?;
        Some(encode(match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::failure(Some(id), err.to_error_object()),
        }))
    }

    async fn invoke(
        &self,
        method_name: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let Ok(method) = method_name.parse::<McpMethod>() else {
            logging::log_unknown_method(method_name);
            return Err(McpError::UnknownMethod(method_name.to_string()));
        };

        if !ctx.session.capabilities().is_enabled(method) {
            logging::log_capability_rejected(method_name, &ctx.session.id().to_string());
            return Err(McpError::CapabilityNotNegotiated(method_name.to_string()));
        }

        let Some(handler) = self.handlers.get(&method) else {
            logging::log_unknown_method(method_name);
            return Err(McpError::UnknownMethod(method_name.to_string()));
        };

        // The handshake is never gated so a refused client still learns why
        if let Some(authorizer) = &self.authorizer {
            if method.capability_group().is_some() {
                if let Err(e) = authorizer.authorize(method, &ctx).await {
                    warn!(method = %method, session_id = %ctx.session.id(), error = %e, "Request not authorized");
                    return Err(e);
                }
            }
        }

        let start = Instant::now();
        let result = handler.handle(method, params, &ctx).await;
        match &result {
            Ok(_) => logging::log_handler_success(method_name, start.elapsed()),
            Err(e) => logging::log_handler_error(method_name, &e.to_string(), start.elapsed()),
        }
        result
    }

    /// Answer a message with `error` without dispatching it. Notifications
    /// and peer responses get no answer.
    pub fn reject(raw: &[u8], error: McpError) -> Option<String> {
        match Message::parse(raw) {
            Ok(Message::Request(req)) => Some(encode(Response::failure(
                Some(req.id),
                error.to_error_object(),
            ))),
            Ok(_) => None,
            Err(rejected) => Some(encode(rejected.to_response())),
        }
    }
}

fn encode(response: Response) -> String {
    response.encode().unwrap_or_else(|e| {
        logging::log_response_error(&e.to_string());
        McpError::Internal(e.to_string())
            .to_json_rpc_error(None)
            .to_string()
    })
}
