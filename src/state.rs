//! Session state and its reducer.
//!
//! [`SessionState`] is the single source of truth the view layer reads: the
//! connection flags, every open quest with its transcript, the model/mode/
//! command catalogs, the latest usage snapshot and the pending permission
//! prompt. It only changes through [`SessionState::apply`], one [`Action`] at a
//! time. Every transition is total: actions naming an unknown quest, and update
//! kinds the reducer does not track, leave the state unchanged.

pub mod action;
pub mod quest;

pub use action::Action;
pub use quest::{ChatItem, ItemId, ItemIdSequence, Quest, ToolCallItem};

use crate::QuestId;
use crate::acp::RequestId;
use crate::acp::types::{Command, ContentBlock, Mode, Model, PermissionRequest, SessionUpdate, Usage};

use serde::Serialize;

/// The agent's outstanding permission prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPermission {
    pub request_id: RequestId,
    pub quest_id: QuestId,
    pub request: PermissionRequest,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionState {
    pub connected: bool,
    pub initialized: bool,
    /// Open quests in creation order.
    pub quests: Vec<Quest>,
    pub active_quest_id: Option<QuestId>,
    pub models: Vec<Model>,
    pub modes: Vec<Mode>,
    pub commands: Vec<Command>,
    pub usage: Option<Usage>,
    pub pending_permission: Option<PendingPermission>,
    #[serde(skip)]
    item_ids: ItemIdSequence,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quest(&self, quest_id: &str) -> Option<&Quest> {
        self.quests.iter().find(|quest| quest.id == quest_id)
    }

    fn quest_mut(&mut self, quest_id: &str) -> Option<&mut Quest> {
        self.quests.iter_mut().find(|quest| quest.id == quest_id)
    }

    pub fn active_quest(&self) -> Option<&Quest> {
        self.active_quest_id
            .as_deref()
            .and_then(|quest_id| self.quest(quest_id))
    }

    fn active_quest_mut(&mut self) -> Option<&mut Quest> {
        let quest_id = self.active_quest_id.clone()?;
        self.quest_mut(&quest_id)
    }

    pub fn tool_call(&self, quest_id: &str, tool_call_id: &str) -> Option<&ToolCallItem> {
        self.quest(quest_id)?.tool_call(tool_call_id)
    }

    /// Apply one action.
    pub fn apply(&mut self, action: Action) {
        match action {
            Action::Connected => self.connected = true,
            Action::Disconnected => {
                self.connected = false;
                self.initialized = false;
            }
            Action::ProtocolInitialized { models, modes } => {
                self.models = models.available_models;
                self.modes = modes.available_modes;
                self.initialized = true;
            }
            Action::QuestCreated {
                quest_id,
                cwd,
                models,
                modes,
                created_at,
            } => {
                if self.quest(&quest_id).is_some() {
                    tracing::debug!(%quest_id, "quest already exists, activating");
                    self.active_quest_id = Some(quest_id);
                    return;
                }

                let (session_model, session_models) = match models {
                    Some(catalog) => (catalog.current_model_id, catalog.available_models),
                    None => (None, Vec::new()),
                };
                let (session_mode, session_modes) = match modes {
                    Some(catalog) => (catalog.current_mode_id, catalog.available_modes),
                    None => (None, Vec::new()),
                };
                if !session_models.is_empty() {
                    self.models = session_models;
                }
                if !session_modes.is_empty() {
                    self.modes = session_modes;
                }

                let title = format!("Quest {}", self.quests.len() + 1);
                let mut quest = Quest::new(quest_id.clone(), title, cwd, created_at);
                quest.current_model_id = session_model
                    .or_else(|| self.models.first().map(|model| model.model_id.clone()))
                    .unwrap_or_default();
                quest.current_mode_id = session_mode
                    .or_else(|| self.modes.first().map(|mode| mode.id.clone()))
                    .unwrap_or_default();

                self.quests.push(quest);
                self.active_quest_id = Some(quest_id);
            }
            Action::QuestSwitched { quest_id } => {
                if self.quest(&quest_id).is_some() {
                    self.active_quest_id = Some(quest_id);
                }
            }
            Action::QuestClosed { quest_id } => {
                self.quests.retain(|quest| quest.id != quest_id);
                if self.active_quest_id.as_deref() == Some(quest_id.as_str()) {
                    self.active_quest_id = self.quests.first().map(|quest| quest.id.clone());
                }
            }
            Action::QuestRenamed { quest_id, title } => {
                if let Some(quest) = self.quest_mut(&quest_id) {
                    quest.title = title;
                }
            }
            Action::UserPromptSent { text } => {
                let Some(quest_id) = self.active_quest_id.clone() else {
                    return;
                };
                let item_ids = &mut self.item_ids;
                if let Some(quest) = self.quests.iter_mut().find(|quest| quest.id == quest_id) {
                    quest.push_user(item_ids, text);
                    quest.processing = true;
                }
            }
            Action::PromptCompleted {
                quest_id,
                stop_reason,
            } => {
                if let Some(quest) = self.quest_mut(&quest_id) {
                    quest.complete_agent_tail();
                    quest.processing = false;
                    quest.last_stop_reason = Some(stop_reason);
                }
            }
            Action::ModelSelected { model_id } => {
                if let Some(quest) = self.active_quest_mut() {
                    quest.current_model_id = model_id;
                }
            }
            Action::ModeSelected { mode_id } => {
                if let Some(quest) = self.active_quest_mut() {
                    quest.current_mode_id = mode_id;
                }
            }
            Action::ToolCallSelected { tool_call_id } => {
                if let Some(quest) = self.active_quest_mut() {
                    quest.focused_tool_call = tool_call_id;
                }
            }
            Action::PermissionRequested {
                request_id,
                quest_id,
                request,
            } => {
                if let Some(stale) = &self.pending_permission {
                    tracing::debug!(
                        request_id = %stale.request_id,
                        "replacing unresolved permission request"
                    );
                }
                self.pending_permission = Some(PendingPermission {
                    request_id,
                    quest_id,
                    request,
                });
            }
            Action::PermissionResolved => self.pending_permission = None,
            Action::CommandsUpdated { commands } => self.commands = commands,
            Action::SessionUpdate { quest_id, update } => self.apply_update(&quest_id, update),
        }
    }

    fn apply_update(&mut self, quest_id: &str, update: SessionUpdate) {
        // Catalog-wide updates first; they do not need the quest to exist.
        match update {
            SessionUpdate::AvailableCommandsUpdate { available_commands } => {
                self.commands = available_commands;
                return;
            }
            SessionUpdate::UsageUpdate { usage } => {
                self.usage = Some(usage);
                return;
            }
            SessionUpdate::UserMessageChunk { .. }
            | SessionUpdate::ConfigOptionUpdate { .. }
            | SessionUpdate::Unknown => return,
            _ => {}
        }

        let item_ids = &mut self.item_ids;
        let Some(quest) = self.quests.iter_mut().find(|quest| quest.id == quest_id) else {
            tracing::debug!(%quest_id, "session update for unknown quest");
            return;
        };

        match update {
            SessionUpdate::AgentMessageChunk { content } => {
                if let ContentBlock::Text { text } = content {
                    quest.append_agent_text(item_ids, &text);
                }
            }
            SessionUpdate::AgentThoughtChunk { content } => {
                if let ContentBlock::Text { text } = content {
                    quest.append_thought_text(item_ids, &text);
                }
            }
            SessionUpdate::ToolCall {
                tool_call_id,
                title,
                kind,
                status,
                raw_input,
                content,
                locations,
            } => {
                quest.open_tool_call(
                    item_ids,
                    ToolCallItem {
                        id: ItemId(0),
                        tool_call_id,
                        title,
                        kind,
                        status,
                        raw_input,
                        content,
                        locations,
                    },
                );
            }
            SessionUpdate::ToolCallUpdate {
                tool_call_id,
                status,
                title,
                content,
            } => {
                if !quest.update_tool_call(&tool_call_id, status, title, content) {
                    tracing::debug!(%quest_id, %tool_call_id, "update for unknown tool call");
                }
            }
            SessionUpdate::Plan { entries } => quest.upsert_plan(item_ids, entries),
            SessionUpdate::CurrentModeUpdate { mode } => quest.current_mode_id = mode,
            SessionUpdate::SessionInfoUpdate { title } => {
                if let Some(title) = title.filter(|title| !title.is_empty()) {
                    quest.title = title;
                }
            }
            SessionUpdate::AvailableCommandsUpdate { .. }
            | SessionUpdate::UsageUpdate { .. }
            | SessionUpdate::UserMessageChunk { .. }
            | SessionUpdate::ConfigOptionUpdate { .. }
            | SessionUpdate::Unknown => {}
        }
    }
}

/// Pure form of [`SessionState::apply`].
pub fn reduce(mut state: SessionState, action: Action) -> SessionState {
    state.apply(action);
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::types::{
        ModeCatalog, ModelCatalog, PermissionOption, PermissionOptionKind, PermissionToolCall,
        PlanEntry, PlanEntryStatus, ToolCallStatus,
    };
    use chrono::Utc;
    use std::path::PathBuf;

    fn created(quest_id: &str) -> Action {
        Action::QuestCreated {
            quest_id: quest_id.into(),
            cwd: PathBuf::from("/tmp"),
            models: None,
            modes: None,
            created_at: Utc::now(),
        }
    }

    fn update(quest_id: &str, update: SessionUpdate) -> Action {
        Action::SessionUpdate {
            quest_id: quest_id.into(),
            update,
        }
    }

    fn agent_text(text: &str) -> SessionUpdate {
        SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(text),
        }
    }

    fn tool_call(tool_call_id: &str) -> SessionUpdate {
        SessionUpdate::ToolCall {
            tool_call_id: tool_call_id.into(),
            title: "Run tests".into(),
            kind: Some("execute".into()),
            status: ToolCallStatus::Pending,
            raw_input: None,
            content: None,
            locations: None,
        }
    }

    fn tool_call_update(tool_call_id: &str, status: ToolCallStatus) -> SessionUpdate {
        SessionUpdate::ToolCallUpdate {
            tool_call_id: tool_call_id.into(),
            status: Some(status),
            title: None,
            content: None,
        }
    }

    fn plan(contents: &[&str]) -> SessionUpdate {
        SessionUpdate::Plan {
            entries: contents
                .iter()
                .map(|content| PlanEntry {
                    content: content.to_string(),
                    status: PlanEntryStatus::Pending,
                    priority: None,
                })
                .collect(),
        }
    }

    fn model(id: &str) -> Model {
        Model {
            model_id: id.into(),
            name: id.to_uppercase(),
        }
    }

    fn state_with(actions: impl IntoIterator<Item = Action>) -> SessionState {
        actions.into_iter().fold(SessionState::new(), reduce)
    }

    #[test]
    fn agent_deltas_coalesce_into_one_item() {
        let state = state_with([
            created("s1"),
            update("s1", agent_text("Hel")),
            update("s1", agent_text("lo")),
        ]);

        let quest = state.quest("s1").expect("quest");
        assert_eq!(quest.transcript.len(), 1);
        assert!(matches!(
            &quest.transcript[0],
            ChatItem::Agent { text, complete: false, .. } if text == "Hello"
        ));
    }

    #[test]
    fn tool_call_open_completes_agent_turn() {
        let state = state_with([
            created("s1"),
            update("s1", agent_text("Hi")),
            update("s1", tool_call("tc1")),
        ]);

        let quest = state.quest("s1").expect("quest");
        assert_eq!(quest.transcript.len(), 2);
        assert!(matches!(
            &quest.transcript[0],
            ChatItem::Agent { text, complete: true, .. } if text == "Hi"
        ));
        let ChatItem::ToolCall(call) = &quest.transcript[1] else {
            panic!("expected tool call item");
        };
        assert_eq!(call.tool_call_id, "tc1");
        assert_eq!(call.status, ToolCallStatus::Pending);
        assert_eq!(quest.focused_tool_call.as_deref(), Some("tc1"));
    }

    #[test]
    fn tool_call_updates_mutate_in_place() {
        let state = state_with([
            created("s1"),
            update("s1", tool_call("tc1")),
            update("s1", tool_call_update("tc1", ToolCallStatus::InProgress)),
            update("s1", tool_call_update("tc1", ToolCallStatus::Completed)),
        ]);

        let quest = state.quest("s1").expect("quest");
        let count = quest
            .transcript
            .iter()
            .filter(|item| matches!(item, ChatItem::ToolCall(call) if call.tool_call_id == "tc1"))
            .count();
        assert_eq!(count, 1);
        assert_eq!(
            state.tool_call("s1", "tc1").map(|call| call.status),
            Some(ToolCallStatus::Completed)
        );
    }

    #[test]
    fn repeated_tool_call_open_does_not_duplicate() {
        let state = state_with([
            created("s1"),
            update("s1", tool_call("tc1")),
            update("s1", tool_call("tc1")),
        ]);
        assert_eq!(state.quest("s1").expect("quest").transcript.len(), 1);
    }

    #[test]
    fn update_for_unknown_tool_call_is_a_noop() {
        let state = state_with([
            created("s1"),
            update("s1", tool_call_update("ghost", ToolCallStatus::Failed)),
        ]);
        assert!(state.quest("s1").expect("quest").transcript.is_empty());
    }

    #[test]
    fn plan_keeps_its_original_position() {
        let state = state_with([
            created("s1"),
            update("s1", agent_text("planning")),
            update("s1", plan(&["a"])),
            update("s1", tool_call("tc1")),
            update("s1", plan(&["a", "b"])),
        ]);

        let quest = state.quest("s1").expect("quest");
        assert_eq!(quest.transcript.len(), 3);
        let ChatItem::Plan { entries, .. } = &quest.transcript[1] else {
            panic!("plan should stay at index 1");
        };
        assert_eq!(entries.len(), 2);
        assert_eq!(quest.plan().map(<[PlanEntry]>::len), Some(2));
    }

    #[test]
    fn non_text_chunks_are_ignored() {
        let state = state_with([
            created("s1"),
            update(
                "s1",
                SessionUpdate::AgentMessageChunk {
                    content: ContentBlock::Unsupported,
                },
            ),
        ]);
        assert!(state.quest("s1").expect("quest").transcript.is_empty());
    }

    #[test]
    fn updates_target_the_named_quest_not_the_active_one() {
        let state = state_with([
            created("s1"),
            created("s2"),
            update("s1", agent_text("background")),
        ]);

        assert_eq!(state.active_quest_id.as_deref(), Some("s2"));
        assert_eq!(state.quest("s1").expect("s1").transcript.len(), 1);
        assert!(state.quest("s2").expect("s2").transcript.is_empty());
    }

    #[test]
    fn quest_creation_titles_and_activates() {
        let state = state_with([created("s1")]);
        assert_eq!(state.active_quest_id.as_deref(), Some("s1"));
        assert_eq!(state.quest("s1").map(|quest| quest.title.as_str()), Some("Quest 1"));

        let state = reduce(state, created("s2"));
        assert_eq!(state.quest("s2").map(|quest| quest.title.as_str()), Some("Quest 2"));
    }

    #[test]
    fn closing_active_quest_falls_back_to_first_remaining() {
        let state = state_with([created("s1"), created("s2")]);
        let state = reduce(
            state,
            Action::QuestClosed {
                quest_id: "s2".into(),
            },
        );
        assert_eq!(state.active_quest_id.as_deref(), Some("s1"));

        let state = reduce(
            state,
            Action::QuestClosed {
                quest_id: "s1".into(),
            },
        );
        assert_eq!(state.active_quest_id, None);
        assert!(state.quests.is_empty());
    }

    #[test]
    fn closing_inactive_quest_keeps_active() {
        let state = state_with([
            created("s1"),
            created("s2"),
            Action::QuestClosed {
                quest_id: "s1".into(),
            },
        ]);
        assert_eq!(state.active_quest_id.as_deref(), Some("s2"));
    }

    #[test]
    fn switching_to_unknown_quest_is_a_noop() {
        let state = state_with([
            created("s1"),
            Action::QuestSwitched {
                quest_id: "nope".into(),
            },
        ]);
        assert_eq!(state.active_quest_id.as_deref(), Some("s1"));
    }

    #[test]
    fn prompt_completion_clears_the_named_quest() {
        let state = state_with([
            created("s1"),
            Action::UserPromptSent {
                text: "build it".into(),
            },
            created("s2"),
        ]);
        assert!(state.quest("s1").expect("s1").processing);

        let state = reduce(
            state,
            Action::PromptCompleted {
                quest_id: "s1".into(),
                stop_reason: "end_turn".into(),
            },
        );
        let quest = state.quest("s1").expect("s1");
        assert!(!quest.processing);
        assert_eq!(quest.last_stop_reason.as_deref(), Some("end_turn"));
        assert!(matches!(&quest.transcript[0], ChatItem::User { text, .. } if text == "build it"));
    }

    #[test]
    fn prompt_without_active_quest_is_dropped() {
        let state = state_with([Action::UserPromptSent { text: "hi".into() }]);
        assert!(state.quests.is_empty());
    }

    #[test]
    fn quest_seeds_model_from_session_catalog_then_global_head() {
        let state = state_with([
            Action::ProtocolInitialized {
                models: ModelCatalog {
                    available_models: vec![model("global-a"), model("global-b")],
                    current_model_id: None,
                },
                modes: ModeCatalog {
                    available_modes: Vec::new(),
                    current_mode_id: None,
                },
            },
            created("s1"),
            Action::QuestCreated {
                quest_id: "s2".into(),
                cwd: PathBuf::from("/tmp"),
                models: Some(ModelCatalog {
                    available_models: vec![model("session-a")],
                    current_model_id: Some("session-a".into()),
                }),
                modes: Some(ModeCatalog {
                    available_modes: Vec::new(),
                    current_mode_id: None,
                }),
                created_at: Utc::now(),
            },
        ]);

        assert_eq!(state.quest("s1").expect("s1").current_model_id, "global-a");
        assert_eq!(state.quest("s2").expect("s2").current_model_id, "session-a");
        assert_eq!(state.quest("s2").expect("s2").current_mode_id, "");
        // A non-empty session catalog replaces the global one wholesale.
        assert_eq!(state.models, vec![model("session-a")]);
    }

    #[test]
    fn disconnect_clears_initialized() {
        let state = state_with([
            Action::Connected,
            Action::ProtocolInitialized {
                models: ModelCatalog {
                    available_models: Vec::new(),
                    current_model_id: None,
                },
                modes: ModeCatalog {
                    available_modes: Vec::new(),
                    current_mode_id: None,
                },
            },
        ]);
        assert!(state.connected && state.initialized);

        let state = reduce(state, Action::Disconnected);
        assert!(!state.connected);
        assert!(!state.initialized);
    }

    #[test]
    fn permission_slot_is_singleton() {
        let request = PermissionRequest {
            session_id: "s1".into(),
            options: vec![PermissionOption {
                option_id: "allow".into(),
                name: "Allow".into(),
                kind: PermissionOptionKind::AllowOnce,
            }],
            tool_call: PermissionToolCall {
                tool_call_id: "tc1".into(),
                title: None,
                kind: None,
                status: None,
                raw_input: None,
                content: None,
                locations: None,
            },
        };

        let state = state_with([
            Action::PermissionRequested {
                request_id: RequestId::Number(1),
                quest_id: "s1".into(),
                request: request.clone(),
            },
            Action::PermissionRequested {
                request_id: RequestId::Number(2),
                quest_id: "s1".into(),
                request,
            },
        ]);
        assert_eq!(
            state.pending_permission.as_ref().map(|p| p.request_id.clone()),
            Some(RequestId::Number(2))
        );

        let state = reduce(state, Action::PermissionResolved);
        assert!(state.pending_permission.is_none());
    }

    #[test]
    fn session_level_updates_replace_wholesale() {
        let state = state_with([
            created("s1"),
            update(
                "s1",
                SessionUpdate::CurrentModeUpdate {
                    mode: "plan".into(),
                },
            ),
            update(
                "s1",
                SessionUpdate::SessionInfoUpdate {
                    title: Some("Fix CI".into()),
                },
            ),
            update("s1", SessionUpdate::SessionInfoUpdate { title: None }),
            update(
                "s1",
                SessionUpdate::UsageUpdate {
                    usage: Usage {
                        size: 200_000,
                        used: 1_500,
                        cost: None,
                    },
                },
            ),
            update("s1", SessionUpdate::Unknown),
        ]);

        let quest = state.quest("s1").expect("quest");
        assert_eq!(quest.current_mode_id, "plan");
        assert_eq!(quest.title, "Fix CI");
        assert_eq!(state.usage.as_ref().map(|usage| usage.used), Some(1_500));
        assert!(quest.transcript.is_empty());
    }

    #[test]
    fn local_selections_apply_to_active_quest() {
        let state = state_with([
            created("s1"),
            Action::ModelSelected {
                model_id: "m2".into(),
            },
            Action::ModeSelected {
                mode_id: "code".into(),
            },
            Action::ToolCallSelected {
                tool_call_id: Some("tc9".into()),
            },
            Action::QuestRenamed {
                quest_id: "s1".into(),
                title: "Renamed".into(),
            },
        ]);

        let quest = state.active_quest().expect("active");
        assert_eq!(quest.current_model_id, "m2");
        assert_eq!(quest.current_mode_id, "code");
        assert_eq!(quest.focused_tool_call.as_deref(), Some("tc9"));
        assert_eq!(quest.title, "Renamed");
    }
}
