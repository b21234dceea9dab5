//! Outbound frame construction.

use super::frame::{Notification, Request, RequestId, Response, RpcError};
use super::methods;
use super::types::ContentBlock;

use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Protocol version advertised in `initialize`.
pub const PROTOCOL_VERSION: u32 = 1;

/// Monotonic request id source. Ids start at 1 and are never reused.
#[derive(Debug)]
pub struct RequestIdSequence {
    next: AtomicI64,
}

impl RequestIdSequence {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: i64) -> Self {
        Self {
            next: AtomicI64::new(first),
        }
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIdSequence {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the fixed set of client-to-agent frames.
///
/// Every Request draws its id from the shared [`RequestIdSequence`], so several
/// builders handed the same sequence never collide.
#[derive(Debug, Clone)]
pub struct FrameBuilder {
    ids: Arc<RequestIdSequence>,
}

impl FrameBuilder {
    pub fn new(ids: Arc<RequestIdSequence>) -> Self {
        Self { ids }
    }

    pub fn request(&self, method: &str, params: Value) -> Request {
        Request {
            id: self.ids.next_id(),
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn notification(method: &str, params: Value) -> Notification {
        Notification {
            method: method.to_string(),
            params: Some(params),
        }
    }

    pub fn initialize(&self) -> Request {
        self.request(
            methods::INITIALIZE,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "clientCapabilities": {
                    "fs": { "readTextFile": true, "writeTextFile": true }
                }
            }),
        )
    }

    pub fn session_new(&self, cwd: &Path) -> Request {
        self.request(
            methods::SESSION_NEW,
            json!({ "cwd": cwd.display().to_string(), "mcpServers": [] }),
        )
    }

    pub fn prompt(&self, session_id: &str, text: &str) -> Request {
        let prompt = vec![ContentBlock::text(text)];
        self.request(
            methods::SESSION_PROMPT,
            json!({ "sessionId": session_id, "prompt": prompt }),
        )
    }

    /// `session/cancel` is fire-and-forget, so it carries no id.
    pub fn cancel(session_id: &str) -> Notification {
        Self::notification(methods::SESSION_CANCEL, json!({ "sessionId": session_id }))
    }

    pub fn set_model(&self, session_id: &str, model_id: &str) -> Request {
        self.request(
            methods::SESSION_SET_MODEL,
            json!({ "sessionId": session_id, "modelId": model_id }),
        )
    }

    pub fn set_mode(&self, session_id: &str, mode_id: &str) -> Request {
        self.request(
            methods::SESSION_SET_MODE,
            json!({ "sessionId": session_id, "modeId": mode_id }),
        )
    }

    pub fn set_config_option(&self, session_id: &str, key: &str, value: Value) -> Request {
        self.request(
            methods::SESSION_SET_CONFIG_OPTION,
            json!({ "sessionId": session_id, "configId": key, "value": value }),
        )
    }

    pub fn response(id: RequestId, result: Value) -> Response {
        Response {
            id,
            outcome: Ok(result),
        }
    }

    pub fn error_response(id: RequestId, error: RpcError) -> Response {
        Response {
            id,
            outcome: Err(error),
        }
    }

    /// Answer to `session/request_permission` selecting `option_id`.
    pub fn permission_selected(id: RequestId, option_id: &str) -> Response {
        Self::response(
            id,
            json!({ "outcome": { "outcome": "selected", "optionId": option_id } }),
        )
    }
}
