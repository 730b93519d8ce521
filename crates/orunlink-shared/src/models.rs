//! Domain model structs as stored in the backend's tables.
//!
//! Every struct derives `Serialize` and `Deserialize` so it can round-trip
//! through the REST facade and the change feed's JSON row payloads.  The
//! client only ever holds transient, derived copies; the backend owns the
//! durable rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{
    CommentId, MessageId, NotificationId, ParticipantRole, ProjectId, RequestId, RequestStatus,
    UserId,
};

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// A user's public profile.  Created after signup, separately from the auth
/// record; the email lives only in the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    /// Auth identity this profile belongs to.
    pub id: UserId,
    /// Unique handle chosen at signup.
    pub username: String,
    /// Optional display name shown instead of the username.
    pub display_name: Option<String>,
    /// Optional free-form bio.
    pub bio: Option<String>,
    /// Optional avatar URL in the storage bucket.
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Profile {
    /// The name to render: display name when set, username otherwise.
    pub fn visible_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

/// A published media project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    /// Owner; only the owner may update or delete the project.
    pub owner: UserId,
    pub title: String,
    pub description: String,
    /// Optional category label.
    pub category: Option<String>,
    pub tags: Vec<String>,
    /// Cover image URL.
    pub main_image_url: Option<String>,
    /// Ordered media URLs in the storage bucket.
    pub media_urls: Vec<String>,
    /// Derived counter, maintained by the backend.
    pub like_count: i64,
    /// Derived counter, maintained by the backend.
    pub comment_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Comment
// ---------------------------------------------------------------------------

/// A comment on a project.  Append-only from the client's perspective.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Comment {
    pub id: CommentId,
    pub project: ProjectId,
    pub author: UserId,
    pub content: String,
    /// Derived counter, maintained by the backend.
    pub like_count: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Join request
// ---------------------------------------------------------------------------

/// A request to collaborate on a project.
///
/// At most one pending request exists per (project, requester) pair; the
/// backend enforces this as an upsert rather than trusting a check-then-act
/// sequence on the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    pub id: RequestId,
    pub project: ProjectId,
    pub requester: UserId,
    /// Project owner at the time the request was created; the only user
    /// allowed to accept or reject it.
    pub owner: UserId,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    /// Set when the request reaches a terminal state.
    pub decided_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A single chat message, group or direct.  Append-only; no edit/delete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: MessageId,
    /// Filterable conversation key (see [`crate::types::Conversation::key`]).
    pub conversation: String,
    /// Set for group messages: the project whose channel this is.
    pub project: Option<ProjectId>,
    pub sender: UserId,
    /// Set for direct messages: the other party.
    pub recipient: Option<UserId>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Membership of a user in a project's group chat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatParticipant {
    pub project: ProjectId,
    pub user: UserId,
    pub role: ParticipantRole,
    pub joined_at: DateTime<Utc>,
    /// Timestamp of the last message the user has read, if any.
    pub last_read_at: Option<DateTime<Utc>>,
}

/// Per-project group chat settings, mutable by creator/admin roles only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupChatSettings {
    pub project: ProjectId,
    pub title: String,
    pub description: Option<String>,
    pub avatar_url: Option<String>,
    pub theme_color: Option<String>,
    pub background: Option<String>,
    pub notifications_enabled: bool,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Toggles
// ---------------------------------------------------------------------------

/// A presence row for a like, save, or follow.
///
/// The toggle's state is the row's existence: toggling inserts or deletes,
/// never updates a flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToggleRow {
    pub user: UserId,
    /// Project id for likes/saves, user id for follows.
    pub target: Uuid,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// What a notification is about.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Like,
    Comment,
    JoinRequestReceived,
    JoinRequestAccepted,
}

/// An in-app notification for a user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notification {
    pub id: NotificationId,
    /// Who the notification is for.
    pub recipient: UserId,
    /// Who triggered it.
    pub actor: UserId,
    pub kind: NotificationKind,
    /// The project the action happened on, when applicable.
    pub project: Option<ProjectId>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
