//! JSON-RPC message envelope
//!
//! Incoming bytes are first read into a borrowed [`RawMessage`] so the
//! envelope can be classified without materializing `params` or `result`,
//! then promoted to an owned [`Message`].

use {
    super::method::McpMethod,
    crate::error::{ErrorObject, McpError, McpResult},
    serde::{de::DeserializeOwned, de::IgnoredAny, Deserialize, Serialize},
    serde_json::{value::RawValue, Value},
    std::{borrow::Cow, fmt},
};

pub const JSONRPC_VERSION: &str = "2.0";

/// Correlation identifier. Requests carry one; notifications never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: impl Into<RequestId>, method: McpMethod, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.as_str().to_string(),
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: McpMethod, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.as_str().to_string(),
            params,
        }
    }

    pub fn encode(&self) -> McpResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Result(Value),
    Error(ErrorObject),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    /// `None` only for errors raised before the request id could be read.
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            outcome: Outcome::Result(result),
        }
    }

    pub fn failure(id: Option<RequestId>, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome: Outcome::Error(error),
        }
    }

    pub fn encode(&self) -> McpResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    /// Parse an encoded message. On failure the request id is returned
    /// alongside the error whenever it could be recovered.
    pub fn parse(bytes: &[u8]) -> Result<Message, Rejected> {
        let raw = RawMessage::from_slice(bytes)?;
        raw.into_message()
    }

    pub fn encode(&self) -> McpResult<String> {
        let encoded = match self {
            Self::Request(r) => serde_json::to_string(r)?,
            Self::Notification(n) => serde_json::to_string(n)?,
            Self::Response(r) => serde_json::to_string(r)?,
        };
        Ok(encoded)
    }
}

/// A message that could not be accepted, with whatever id was recoverable.
#[derive(Debug)]
pub struct Rejected {
    pub id: Option<RequestId>,
    pub error: McpError,
}

impl Rejected {
    fn new(id: Option<RequestId>, error: McpError) -> Self {
        Self { id, error }
    }

    /// Error response for this rejection. Per JSON-RPC, a rejected message
    /// whose id is unknown is still answered with a null id.
    pub fn to_response(&self) -> Response {
        Response::failure(self.id.clone(), self.error.to_error_object())
    }
}

/// Raw JSON-RPC message with lazy parsing
#[derive(Debug, Deserialize)]
pub struct RawMessage<'a> {
    #[serde(borrow, default)]
    pub jsonrpc: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    pub id: Option<&'a RawValue>,
    #[serde(borrow, default)]
    pub method: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    pub params: Option<&'a RawValue>,
    #[serde(borrow, default)]
    pub result: Option<&'a RawValue>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
}

impl<'a> RawMessage<'a> {
    /// Parse from bytes. Valid JSON that is not a message object (arrays,
    /// scalars, batches) is an invalid request rather than a parse error.
    pub fn from_slice(bytes: &'a [u8]) -> Result<Self, Rejected> {
        serde_json::from_slice::<RawMessage<'a>>(bytes).map_err(|e| {
            if serde_json::from_slice::<IgnoredAny>(bytes).is_ok() {
                Rejected::new(None, McpError::InvalidRequest(format!("not a message object: {e}")))
            } else {
                Rejected::new(None, McpError::Parse(e.to_string()))
            }
        })
    }

    fn request_id(&self) -> Result<Option<RequestId>, Rejected> {
        match self.id {
            None => Ok(None),
            Some(raw) => serde_json::from_str::<Option<RequestId>>(raw.get()).map_err(|_| {
                Rejected::new(
                    None,
                    McpError::InvalidRequest(format!("invalid id: {}", raw.get())),
                )
            }),
        }
    }

    pub fn into_message(self) -> Result<Message, Rejected> {
        let id = self.request_id()?;

        if self.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(Rejected::new(
                id,
                McpError::InvalidRequest(format!(
                    "Invalid jsonrpc version: {}",
                    self.jsonrpc.as_deref().unwrap_or("<missing>")
                )),
            ));
        }

        if let Some(method) = self.method {
            if method.is_empty() {
                return Err(Rejected::new(id, McpError::InvalidRequest("Empty method name".into())));
            }
            let params = match self.params {
                Some(raw) => Some(
                    serde_json::from_str::<Value>(raw.get())
                        .map_err(|e| Rejected::new(id.clone(), McpError::Parse(e.to_string())))?,
                ),
                None => None,
            };
            return Ok(match id {
                Some(id) => Message::Request(Request {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    id,
                    method: method.into_owned(),
                    params,
                }),
                None => Message::Notification(Notification {
                    jsonrpc: JSONRPC_VERSION.to_string(),
                    method: method.into_owned(),
                    params,
                }),
            });
        }

        let outcome = match (self.error, self.result) {
            (Some(error), _) => Outcome::Error(error),
            (None, Some(raw)) => Outcome::Result(
                serde_json::from_str(raw.get())
                    .map_err(|e| Rejected::new(id.clone(), McpError::Parse(e.to_string())))?,
            ),
            // `"result": null` reads back as an absent field
            (None, None) if id.is_some() => Outcome::Result(Value::Null),
            (None, None) => {
                return Err(Rejected::new(
                    None,
                    McpError::InvalidRequest("Missing method".into()),
                ))
            }
        };
        Ok(Message::Response(Response {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            outcome,
        }))
    }
}

/// Deserialize method parameters into their typed form. Absent params are
/// treated as an empty object so parameterless methods deserialize cleanly.
pub fn parse_params<T: DeserializeOwned>(method: McpMethod, params: Option<Value>) -> McpResult<T> {
    let params = params.unwrap_or_else(|| Value::Object(Default::default()));
    serde_json::from_value(params)
        .map_err(|e| McpError::InvalidParams(format!("Invalid {method} params: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_parsing() {
        let msg = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo"}}"#;
        match Message::parse(msg.as_bytes()).unwrap() {
            Message::Request(req) => {
                assert_eq!(req.id, RequestId::Number(1));
                assert_eq!(req.method, "tools/call");
                assert_eq!(req.params.unwrap()["name"], "echo");
            }
            other => panic!("Expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_notification_has_no_id() {
        let msg = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        assert!(matches!(
            Message::parse(msg.as_bytes()).unwrap(),
            Message::Notification(_)
        ));
    }

    #[test]
    fn test_string_ids_survive() {
        let msg = r#"{"jsonrpc":"2.0","id":"abc-1","method":"ping"}"#;
        let Message::Request(req) = Message::parse(msg.as_bytes()).unwrap() else {
            panic!("Expected request");
        };
        assert_eq!(req.id, RequestId::String("abc-1".into()));
    }

    #[test]
    fn test_parse_error() {
        let rejected = Message::parse(b"{not json").unwrap_err();
        assert!(rejected.id.is_none());
        assert!(matches!(rejected.error, McpError::Parse(_)));
        let encoded = rejected.to_response().encode().unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(value["error"]["code"], -32700);
        assert!(value["id"].is_null());
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let msg = r#"{"jsonrpc":"1.0","id":9,"method":"ping"}"#;
        let rejected = Message::parse(msg.as_bytes()).unwrap_err();
        assert_eq!(rejected.id, Some(RequestId::Number(9)));
        assert!(matches!(rejected.error, McpError::InvalidRequest(_)));
    }

    #[test]
    fn test_batch_is_invalid_request() {
        let rejected = Message::parse(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#).unwrap_err();
        assert!(matches!(rejected.error, McpError::InvalidRequest(_)));
    }

    #[test]
    fn test_response_shapes() {
        let ok = Response::success(RequestId::Number(3), json!({"ok": true}));
        let value: Value = serde_json::from_str(&ok.encode().unwrap()).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 3, "result": {"ok": true}}));

        let null_result = r#"{"jsonrpc":"2.0","id":4,"result":null}"#;
        let Message::Response(resp) = Message::parse(null_result.as_bytes()).unwrap() else {
            panic!("Expected response");
        };
        assert_eq!(resp.outcome, Outcome::Result(Value::Null));

        let err = r#"{"jsonrpc":"2.0","id":5,"error":{"code":-32601,"message":"nope"}}"#;
        let Message::Response(resp) = Message::parse(err.as_bytes()).unwrap() else {
            panic!("Expected response");
        };
        assert!(matches!(resp.outcome, Outcome::Error(ref e) if e.code == -32601));
    }

    #[test]
    fn test_parse_params_reports_invalid_params() {
        #[derive(Debug, Deserialize)]
        struct Needs {
            #[allow(dead_code)]
            uri: String,
        }
        let err = parse_params::<Needs>(McpMethod::ResourcesRead, Some(json!({}))).unwrap_err();
        assert_eq!(err.error_code(), -32602);
    }
}
