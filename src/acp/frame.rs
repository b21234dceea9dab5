//! JSON-RPC frame model and inbound classification.
//!
//! A frame is classified purely by which of `id` and `method` it carries:
//! `id` only is a Response, `method` only is a Notification, both is a Request
//! from the agent expecting a same-id Response. Anything else is dropped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request id. Outbound ids are always numeric; agents may use strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(id) => write!(f, "{id}"),
            RequestId::Text(id) => write!(f, "{id}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// Error object carried by a Response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(Self::METHOD_NOT_FOUND, format!("method not found: {method}"))
    }

    pub fn invalid_params(detail: impl std::fmt::Display) -> Self {
        Self::new(Self::INVALID_PARAMS, format!("invalid params: {detail}"))
    }

    pub fn internal(detail: impl std::fmt::Display) -> Self {
        Self::new(Self::INTERNAL_ERROR, detail.to_string())
    }

    /// Decode a Response `error` member. Shapes that are not a well-formed
    /// error object still reject the request: missing fields fall back to
    /// `INTERNAL_ERROR` and the raw value's text, and the raw value is kept
    /// in `data`.
    pub fn from_wire(error: Value) -> Self {
        if let Ok(decoded) = serde_json::from_value::<RpcError>(error.clone()) {
            return decoded;
        }
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(Self::INTERNAL_ERROR);
        let message = match error.get("message") {
            Some(Value::String(message)) => message.clone(),
            _ => match &error {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            },
        };
        Self {
            code,
            message,
            data: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Result<Value, RpcError>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// One protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl From<Request> for Frame {
    fn from(request: Request) -> Self {
        Frame::Request(request)
    }
}

impl From<Response> for Frame {
    fn from(response: Response) -> Self {
        Frame::Response(response)
    }
}

impl From<Notification> for Frame {
    fn from(notification: Notification) -> Self {
        Frame::Notification(notification)
    }
}

impl Frame {
    /// Classify a raw inbound payload. Returns `None` for anything undecodable.
    pub fn parse(raw: &str) -> Option<Frame> {
        let Value::Object(mut object) = serde_json::from_str::<Value>(raw).ok()? else {
            return None;
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(value) => Some(serde_json::from_value::<RequestId>(value).ok()?),
        };
        let method = match object.remove("method") {
            Some(Value::String(method)) => Some(method),
            _ => None,
        };
        let params = object.remove("params");

        match (id, method) {
            (Some(id), None) => {
                let outcome = match object.remove("error") {
                    Some(Value::Null) | None => {
                        Ok(object.remove("result").unwrap_or(Value::Null))
                    }
                    Some(error) => Err(RpcError::from_wire(error)),
                };
                Some(Frame::Response(Response { id, outcome }))
            }
            (None, Some(method)) => Some(Frame::Notification(Notification { method, params })),
            (Some(id), Some(method)) => Some(Frame::Request(Request { id, method, params })),
            (None, None) => None,
        }
    }

    /// Serialize to the JSON text sent over the socket.
    pub fn to_text(&self) -> String {
        let mut object = Map::new();
        object.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));

        match self {
            Frame::Request(request) => {
                object.insert("id".into(), id_value(&request.id));
                object.insert("method".into(), Value::from(request.method.as_str()));
                if let Some(params) = &request.params {
                    object.insert("params".into(), params.clone());
                }
            }
            Frame::Response(response) => {
                object.insert("id".into(), id_value(&response.id));
                match &response.outcome {
                    Ok(result) => {
                        object.insert("result".into(), result.clone());
                    }
                    Err(error) => {
                        object.insert(
                            "error".into(),
                            serde_json::to_value(error).unwrap_or(Value::Null),
                        );
                    }
                }
            }
            Frame::Notification(notification) => {
                object.insert("method".into(), Value::from(notification.method.as_str()));
                if let Some(params) = &notification.params {
                    object.insert("params".into(), params.clone());
                }
            }
        }

        Value::Object(object).to_string()
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Number(id) => Value::from(*id),
        RequestId::Text(id) => Value::from(id.as_str()),
    }
}
