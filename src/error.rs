//! Top-level error types for questline.

use std::sync::Arc;

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Error object carried by an inbound Response, passed through verbatim.
    #[error("agent returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("unexpected {method} result shape: {source}")]
    Decode {
        method: String,
        source: serde_json::Error,
    },

    #[error("no active quest")]
    NoActiveQuest,

    #[error("no permission request is pending")]
    NoPendingPermission,

    #[error("permission request has no option {option_id:?}")]
    UnknownPermissionOption { option_id: String },

}

impl From<crate::acp::RpcError> for Error {
    fn from(error: crate::acp::RpcError) -> Self {
        Error::Rpc {
            code: error.code,
            message: error.message,
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: Arc<std::io::Error>,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Socket lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to open socket to {url}: {message}")]
    Dial { url: String, message: String },

    #[error("socket is not connected")]
    NotConnected,

    #[error("gave up on {url} after {attempts} reconnect attempts")]
    Exhausted { url: String, attempts: u32 },

    #[error("request {id} was dropped before a response arrived")]
    Closed { id: String },
}
