//! questline: an Agent Client Protocol session engine.
//!
//! Drives one or more concurrent agent conversations ("quests") over a single
//! persistent message socket, correlating requests with responses, merging
//! streamed updates into per-quest transcripts and answering the agent's own
//! requests.

pub mod acp;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod state;

pub use engine::{Engine, PromptHandle};
pub use error::{Error, Result};

/// Quest identifier, as assigned by the agent in `session/new`.
pub type QuestId = String;
