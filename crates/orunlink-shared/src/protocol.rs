//! Change-feed event protocol.
//!
//! The backend pushes one [`ChangeEvent`] per committed row change on a
//! watched table.  Subscriptions are expressed as a [`Scope`]: a table plus
//! an optional column filter, evaluated client-side against the event's JSON
//! row payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::SharedError;

/// Every table the realtime feed can watch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Profiles,
    Projects,
    Comments,
    JoinRequests,
    ChatMessages,
    ChatParticipants,
    GroupChatSettings,
    Likes,
    Saves,
    Follows,
    Notifications,
}

impl Table {
    /// Stable wire name, matching the backend's table names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Projects => "projects",
            Self::Comments => "comments",
            Self::JoinRequests => "join_requests",
            Self::ChatMessages => "chat_messages",
            Self::ChatParticipants => "chat_participants",
            Self::GroupChatSettings => "group_chat_settings",
            Self::Likes => "likes",
            Self::Saves => "saves",
            Self::Follows => "follows",
            Self::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The kind of row change an event describes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A single row change pushed by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: Table,
    pub op: ChangeOp,
    /// The full row after the change (before it, for deletes), as JSON.
    pub row: serde_json::Value,
    /// Backend commit timestamp.
    pub committed_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Decode the row payload into a typed model.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, SharedError> {
        serde_json::from_value(self.row.clone()).map_err(SharedError::Decode)
    }
}

/// A column filter applied to an event's row payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum Filter {
    /// Matches events whose row has `column` equal to the given value.
    Eq(String, serde_json::Value),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Eq(column.into(), value.into())
    }

    fn matches(&self, row: &serde_json::Value) -> bool {
        match self {
            Self::Eq(column, value) => row.get(column) == Some(value),
        }
    }
}

/// What a subscription watches: a table, optionally narrowed by a filter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scope {
    pub table: Table,
    pub filter: Option<Filter>,
}

impl Scope {
    /// Watch every change on a table.
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filter: None,
        }
    }

    /// Watch changes on a table where `column` equals `value`.
    pub fn filtered(
        table: Table,
        column: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        Self {
            table,
            filter: Some(Filter::eq(column, value)),
        }
    }

    /// Whether an event falls inside this scope.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table {
            return false;
        }
        match &self.filter {
            Some(filter) => filter.matches(&event.row),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChatMessage;
    use crate::types::{Conversation, MessageId, ProjectId, UserId};

    fn message_event(conversation: &str) -> ChangeEvent {
        let msg = ChatMessage {
            id: MessageId::new(),
            conversation: conversation.to_string(),
            project: None,
            sender: UserId::new(),
            recipient: None,
            content: "hello".into(),
            created_at: Utc::now(),
        };
        ChangeEvent {
            table: Table::ChatMessages,
            op: ChangeOp::Insert,
            row: serde_json::to_value(&msg).unwrap(),
            committed_at: Utc::now(),
        }
    }

    #[test]
    fn scope_matches_table_and_filter() {
        let convo = Conversation::Project(ProjectId::new());
        let event = message_event(&convo.key());

        let unfiltered = Scope::table(Table::ChatMessages);
        assert!(unfiltered.matches(&event));

        let scoped = Scope::filtered(Table::ChatMessages, "conversation", convo.key());
        assert!(scoped.matches(&event));

        let other = Scope::filtered(
            Table::ChatMessages,
            "conversation",
            Conversation::Project(ProjectId::new()).key(),
        );
        assert!(!other.matches(&event));

        let wrong_table = Scope::table(Table::Comments);
        assert!(!wrong_table.matches(&event));
    }

    #[test]
    fn event_decodes_back_to_model() {
        let convo = Conversation::Project(ProjectId::new());
        let event = message_event(&convo.key());
        let decoded: ChatMessage = event.decode().unwrap();
        assert_eq!(decoded.conversation, convo.key());
    }
}
