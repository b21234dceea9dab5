//! Agent-initiated requests.
//!
//! The agent calls back into the client for permission prompts, file I/O and
//! terminals. Permission prompts are escalated to the session state so a user
//! can answer them; everything else is answered by an [`AgentRequestHandler`].
//! [`StubRequestHandler`] answers without touching the filesystem or spawning
//! processes; embedders wanting real effects supply their own handler.

use super::builders::FrameBuilder;
use super::frame::{Request, RequestId, Response, RpcError};
use super::methods;
use super::types::PermissionRequest;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    pub path: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalParams {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalOutputParams {
    pub terminal_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadTextFileResult {
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteTextFileResult {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalResult {
    pub terminal_id: String,
}

/// Empty-object acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Ack {}

/// An agent-to-client request answered by an [`AgentRequestHandler`].
#[derive(Debug, Clone, PartialEq)]
pub enum AgentRequest {
    ReadTextFile(ReadTextFileParams),
    WriteTextFile(WriteTextFileParams),
    CreateTerminal(CreateTerminalParams),
    TerminalOutput(TerminalOutputParams),
}

fn params_as<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(RpcError::invalid_params)
}

/// Answers agent requests that need an immediate Response.
#[async_trait::async_trait]
pub trait AgentRequestHandler: Send + Sync + 'static {
    async fn read_text_file(
        &self,
        id: &RequestId,
        params: ReadTextFileParams,
    ) -> Result<ReadTextFileResult, RpcError>;

    async fn write_text_file(
        &self,
        id: &RequestId,
        params: WriteTextFileParams,
    ) -> Result<WriteTextFileResult, RpcError>;

    async fn create_terminal(
        &self,
        id: &RequestId,
        params: CreateTerminalParams,
    ) -> Result<CreateTerminalResult, RpcError>;

    async fn terminal_output(
        &self,
        id: &RequestId,
        params: TerminalOutputParams,
    ) -> Result<Ack, RpcError>;
}

/// Handler that performs no real I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct StubRequestHandler;

#[async_trait::async_trait]
impl AgentRequestHandler for StubRequestHandler {
    async fn read_text_file(
        &self,
        _id: &RequestId,
        params: ReadTextFileParams,
    ) -> Result<ReadTextFileResult, RpcError> {
        tracing::debug!(path = %params.path, "answering fs/read_text_file with empty content");
        Ok(ReadTextFileResult {
            content: String::new(),
        })
    }

    async fn write_text_file(
        &self,
        _id: &RequestId,
        params: WriteTextFileParams,
    ) -> Result<WriteTextFileResult, RpcError> {
        tracing::debug!(
            path = %params.path,
            bytes = params.content.len(),
            "acknowledging fs/write_text_file without writing"
        );
        Ok(WriteTextFileResult { success: true })
    }

    async fn create_terminal(
        &self,
        id: &RequestId,
        params: CreateTerminalParams,
    ) -> Result<CreateTerminalResult, RpcError> {
        tracing::debug!(command = %params.command, "synthesizing terminal id");
        Ok(CreateTerminalResult {
            terminal_id: format!("term-{id}"),
        })
    }

    async fn terminal_output(
        &self,
        _id: &RequestId,
        _params: TerminalOutputParams,
    ) -> Result<Ack, RpcError> {
        Ok(Ack::default())
    }
}

/// What to do with an agent request.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Send this Response now.
    Respond(Response),
    /// Hand the prompt to the user; the Response is sent once an option is chosen.
    Escalate {
        id: RequestId,
        request: PermissionRequest,
    },
    /// Ask the handler, then send its answer.
    Handle { id: RequestId, request: AgentRequest },
}

/// Decode an inbound agent request and decide how it is answered.
///
/// Malformed params get an `invalid params` error Response and unknown methods
/// get `method not found`, both carrying the request's id.
pub fn triage(request: Request) -> Disposition {
    let Request { id, method, params } = request;

    let decoded = match method.as_str() {
        methods::REQUEST_PERMISSION => match params_as(params) {
            Ok(request) => return Disposition::Escalate { id, request },
            Err(error) => Err(error),
        },
        methods::READ_TEXT_FILE => params_as(params).map(AgentRequest::ReadTextFile),
        methods::WRITE_TEXT_FILE => params_as(params).map(AgentRequest::WriteTextFile),
        methods::TERMINAL_CREATE => params_as(params).map(AgentRequest::CreateTerminal),
        methods::TERMINAL_OUTPUT => params_as(params).map(AgentRequest::TerminalOutput),
        _ => {
            tracing::debug!(request_id = %id, %method, "unsupported agent request");
            Err(RpcError::method_not_found(&method))
        }
    };

    match decoded {
        Ok(request) => Disposition::Handle { id, request },
        Err(error) => {
            tracing::debug!(request_id = %id, %method, %error, "rejecting agent request");
            Disposition::Respond(FrameBuilder::error_response(id, error))
        }
    }
}

/// Run `request` through `handler` and build the same-id Response.
pub async fn answer(
    handler: &dyn AgentRequestHandler,
    id: RequestId,
    request: AgentRequest,
) -> Response {
    let outcome = match request {
        AgentRequest::ReadTextFile(params) => to_value(handler.read_text_file(&id, params).await),
        AgentRequest::WriteTextFile(params) => {
            to_value(handler.write_text_file(&id, params).await)
        }
        AgentRequest::CreateTerminal(params) => {
            to_value(handler.create_terminal(&id, params).await)
        }
        AgentRequest::TerminalOutput(params) => {
            to_value(handler.terminal_output(&id, params).await)
        }
    };
    Response { id, outcome }
}

fn to_value<T: Serialize>(result: Result<T, RpcError>) -> Result<Value, RpcError> {
    result.and_then(|value| serde_json::to_value(value).map_err(RpcError::internal))
}
