//! Agent Client Protocol (ACP) wire layer.
//!
//! JSON-RPC 2.0 frames exchanged with a remote coding agent: classification of
//! inbound frames, builders for the fixed outbound method set, correlation of
//! responses with outstanding requests, and answers to agent-initiated requests.

pub mod builders;
pub mod correlator;
pub mod frame;
pub mod handler;
pub mod types;

pub use builders::{FrameBuilder, RequestIdSequence};
pub use correlator::{Correlator, PendingResponse};
pub use frame::{Frame, Notification, Request, RequestId, Response, RpcError};
pub use handler::{AgentRequest, AgentRequestHandler, Disposition, StubRequestHandler};

/// Method names used on the wire.
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const SESSION_NEW: &str = "session/new";
    pub const SESSION_PROMPT: &str = "session/prompt";
    pub const SESSION_CANCEL: &str = "session/cancel";
    pub const SESSION_SET_MODEL: &str = "session/set_model";
    pub const SESSION_SET_MODE: &str = "session/set_mode";
    pub const SESSION_SET_CONFIG_OPTION: &str = "session/set_config_option";
    pub const SESSION_UPDATE: &str = "session/update";
    pub const REQUEST_PERMISSION: &str = "session/request_permission";
    pub const READ_TEXT_FILE: &str = "fs/read_text_file";
    pub const WRITE_TEXT_FILE: &str = "fs/write_text_file";
    pub const TERMINAL_CREATE: &str = "terminal/create";
    pub const TERMINAL_OUTPUT: &str = "terminal/output";
}
