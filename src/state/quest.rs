//! Quests and their transcripts.

use crate::QuestId;
use crate::acp::types::{PlanEntry, ToolCallContent, ToolCallLocation, ToolCallStatus};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

/// Transcript item id, unique within one [`SessionState`](super::SessionState).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ci-{}", self.0)
    }
}

/// Source of transcript item ids. Owned by the state it numbers.
#[derive(Debug, Clone, Default)]
pub struct ItemIdSequence {
    last: u64,
}

impl ItemIdSequence {
    pub fn next_id(&mut self) -> ItemId {
        self.last += 1;
        ItemId(self.last)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallItem {
    pub id: ItemId,
    pub tool_call_id: String,
    pub title: String,
    pub kind: Option<String>,
    pub status: ToolCallStatus,
    pub raw_input: Option<Value>,
    pub content: Option<Vec<ToolCallContent>>,
    pub locations: Option<Vec<ToolCallLocation>>,
}

/// One renderable transcript unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatItem {
    User {
        id: ItemId,
        text: String,
    },
    Agent {
        id: ItemId,
        text: String,
        complete: bool,
    },
    /// Thoughts have no completion flag: a thought stays open while it is the tail.
    Thought {
        id: ItemId,
        text: String,
    },
    ToolCall(ToolCallItem),
    Plan {
        id: ItemId,
        entries: Vec<PlanEntry>,
    },
}

impl ChatItem {
    pub fn id(&self) -> ItemId {
        match self {
            ChatItem::User { id, .. }
            | ChatItem::Agent { id, .. }
            | ChatItem::Thought { id, .. }
            | ChatItem::Plan { id, .. } => *id,
            ChatItem::ToolCall(item) => item.id,
        }
    }
}

/// One agent conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quest {
    pub id: QuestId,
    pub title: String,
    pub cwd: PathBuf,
    pub transcript: Vec<ChatItem>,
    pub current_model_id: String,
    pub current_mode_id: String,
    pub processing: bool,
    pub focused_tool_call: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Stop reason of the most recently completed prompt.
    pub last_stop_reason: Option<String>,
}

impl Quest {
    pub fn new(id: QuestId, title: String, cwd: PathBuf, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            title,
            cwd,
            transcript: Vec::new(),
            current_model_id: String::new(),
            current_mode_id: String::new(),
            processing: false,
            focused_tool_call: None,
            created_at,
            last_stop_reason: None,
        }
    }

    pub fn tool_call(&self, tool_call_id: &str) -> Option<&ToolCallItem> {
        self.transcript.iter().find_map(|item| match item {
            ChatItem::ToolCall(call) if call.tool_call_id == tool_call_id => Some(call),
            _ => None,
        })
    }

    fn tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCallItem> {
        self.transcript.iter_mut().find_map(|item| match item {
            ChatItem::ToolCall(call) if call.tool_call_id == tool_call_id => Some(call),
            _ => None,
        })
    }

    pub fn plan(&self) -> Option<&[PlanEntry]> {
        self.transcript.iter().find_map(|item| match item {
            ChatItem::Plan { entries, .. } => Some(entries.as_slice()),
            _ => None,
        })
    }

    pub(super) fn push_user(&mut self, ids: &mut ItemIdSequence, text: String) {
        self.transcript.push(ChatItem::User {
            id: ids.next_id(),
            text,
        });
    }

    pub(super) fn append_agent_text(&mut self, ids: &mut ItemIdSequence, delta: &str) {
        if let Some(ChatItem::Agent {
            text,
            complete: false,
            ..
        }) = self.transcript.last_mut()
        {
            text.push_str(delta);
            return;
        }
        self.transcript.push(ChatItem::Agent {
            id: ids.next_id(),
            text: delta.to_string(),
            complete: false,
        });
    }

    pub(super) fn append_thought_text(&mut self, ids: &mut ItemIdSequence, delta: &str) {
        if let Some(ChatItem::Thought { text, .. }) = self.transcript.last_mut() {
            text.push_str(delta);
            return;
        }
        self.transcript.push(ChatItem::Thought {
            id: ids.next_id(),
            text: delta.to_string(),
        });
    }

    /// Close the agent turn in progress, if the tail is an open Agent item.
    pub(super) fn complete_agent_tail(&mut self) {
        if let Some(ChatItem::Agent { complete, .. }) = self.transcript.last_mut() {
            *complete = true;
        }
    }

    /// Open a tool call. A repeated open for a known id refreshes that item in place.
    pub(super) fn open_tool_call(&mut self, ids: &mut ItemIdSequence, mut call: ToolCallItem) {
        self.complete_agent_tail();
        self.focused_tool_call = Some(call.tool_call_id.clone());

        if let Some(existing) = self.tool_call_mut(&call.tool_call_id) {
            call.id = existing.id;
            *existing = call;
            return;
        }
        call.id = ids.next_id();
        self.transcript.push(ChatItem::ToolCall(call));
    }

    /// Apply a status/content update to the tool call with `tool_call_id`.
    /// Returns `false` when no such tool call exists.
    pub(super) fn update_tool_call(
        &mut self,
        tool_call_id: &str,
        status: Option<ToolCallStatus>,
        title: Option<String>,
        content: Option<Vec<ToolCallContent>>,
    ) -> bool {
        let Some(call) = self.tool_call_mut(tool_call_id) else {
            return false;
        };
        if let Some(status) = status {
            call.status = status;
        }
        if let Some(title) = title {
            call.title = title;
        }
        if content.is_some() {
            call.content = content;
        }
        true
    }

    pub(super) fn upsert_plan(&mut self, ids: &mut ItemIdSequence, new_entries: Vec<PlanEntry>) {
        for item in &mut self.transcript {
            if let ChatItem::Plan { entries, .. } = item {
                *entries = new_entries;
                return;
            }
        }
        self.transcript.push(ChatItem::Plan {
            id: ids.next_id(),
            entries: new_entries,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quest() -> Quest {
        Quest::new("s1".into(), "Quest 1".into(), PathBuf::from("/tmp"), Utc::now())
    }

    #[test]
    fn item_ids_render_with_prefix() {
        let mut ids = ItemIdSequence::default();
        assert_eq!(ids.next_id().to_string(), "ci-1");
        assert_eq!(ids.next_id().to_string(), "ci-2");
    }

    #[test]
    fn completed_agent_item_is_not_extended() {
        let mut ids = ItemIdSequence::default();
        let mut quest = quest();
        quest.append_agent_text(&mut ids, "first");
        quest.complete_agent_tail();
        quest.append_agent_text(&mut ids, "second");

        assert_eq!(quest.transcript.len(), 2);
        assert!(matches!(
            &quest.transcript[1],
            ChatItem::Agent { text, complete: false, .. } if text == "second"
        ));
    }

    #[test]
    fn thought_then_agent_text_start_separate_items() {
        let mut ids = ItemIdSequence::default();
        let mut quest = quest();
        quest.append_thought_text(&mut ids, "thinking ");
        quest.append_thought_text(&mut ids, "hard");
        quest.append_agent_text(&mut ids, "answer");
        quest.append_thought_text(&mut ids, "again");

        assert_eq!(quest.transcript.len(), 3);
        assert!(matches!(
            &quest.transcript[0],
            ChatItem::Thought { text, .. } if text == "thinking hard"
        ));
    }

    #[test]
    fn tool_call_update_without_content_keeps_prior_content() {
        let mut ids = ItemIdSequence::default();
        let mut quest = quest();
        quest.open_tool_call(
            &mut ids,
            ToolCallItem {
                id: ItemId(0),
                tool_call_id: "tc1".into(),
                title: "Edit".into(),
                kind: Some("edit".into()),
                status: ToolCallStatus::Pending,
                raw_input: None,
                content: Some(vec![ToolCallContent::Terminal {
                    terminal_id: "term-1".into(),
                }]),
                locations: None,
            },
        );

        assert!(quest.update_tool_call("tc1", Some(ToolCallStatus::InProgress), None, None));
        let call = quest.tool_call("tc1").expect("tool call");
        assert_eq!(call.status, ToolCallStatus::InProgress);
        assert_eq!(call.title, "Edit");
        assert_eq!(call.content.as_ref().map(Vec::len), Some(1));

        assert!(!quest.update_tool_call("missing", Some(ToolCallStatus::Failed), None, None));
    }
}
