//! Inputs to the session reducer.

use crate::QuestId;
use crate::acp::RequestId;
use crate::acp::types::{Command, ModeCatalog, ModelCatalog, PermissionRequest, SessionUpdate};

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Everything that can change [`SessionState`](super::SessionState).
///
/// Protocol events and user intents both arrive as actions and are applied one
/// at a time in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Connected,
    Disconnected,
    ProtocolInitialized {
        models: ModelCatalog,
        modes: ModeCatalog,
    },
    QuestCreated {
        quest_id: QuestId,
        cwd: PathBuf,
        models: Option<ModelCatalog>,
        modes: Option<ModeCatalog>,
        created_at: DateTime<Utc>,
    },
    QuestSwitched {
        quest_id: QuestId,
    },
    QuestClosed {
        quest_id: QuestId,
    },
    QuestRenamed {
        quest_id: QuestId,
        title: String,
    },
    /// Appends to whichever quest is active when the action is applied.
    UserPromptSent {
        text: String,
    },
    PromptCompleted {
        quest_id: QuestId,
        stop_reason: String,
    },
    ModelSelected {
        model_id: String,
    },
    ModeSelected {
        mode_id: String,
    },
    ToolCallSelected {
        tool_call_id: Option<String>,
    },
    PermissionRequested {
        request_id: RequestId,
        quest_id: QuestId,
        request: PermissionRequest,
    },
    PermissionResolved,
    CommandsUpdated {
        commands: Vec<Command>,
    },
    SessionUpdate {
        quest_id: QuestId,
        update: SessionUpdate,
    },
}
