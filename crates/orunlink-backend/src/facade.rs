//! The [`Backend`] trait: the fixed set of asynchronous operations feature
//! code may perform.  UI-level components never talk to the backend through
//! anything else, so swapping implementations is the only way to change
//! providers.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use orunlink_shared::constants::DEFAULT_PAGE_SIZE;
use orunlink_shared::models::{
    ChatMessage, ChatParticipant, Comment, GroupChatSettings, JoinRequest, Notification, Profile,
    Project,
};
use orunlink_shared::protocol::ChangeEvent;
use orunlink_shared::types::{
    Conversation, NotificationId, ProjectId, RequestId, ToggleKind, ToggleTarget, UserId,
};

use crate::error::Result;

/// An authenticated session returned by sign-in/sign-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub user: Profile,
    pub access_token: String,
}

/// Pagination window for list queries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Page {
    pub limit: u32,
    pub offset: u32,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// Sort order for comment listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentOrder {
    NewestFirst,
    OldestFirst,
}

/// Input for project creation; the backend assigns id, counters, and
/// timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub owner: UserId,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub main_image_url: Option<String>,
    pub media_urls: Vec<String>,
}

/// The backend's change feed: an async stream of committed row changes.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// The data access facade.
///
/// Each method returns a plain data value or fails with
/// [`crate::BackendError`]; there is no retrying inside the facade.
#[async_trait]
pub trait Backend: Send + Sync {
    // ------------------------------------------------------------------
    // Auth / session
    // ------------------------------------------------------------------

    /// Create an auth record and its profile row, and sign in.
    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<AuthSession>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;

    async fn sign_out(&self, token: &str) -> Result<()>;

    /// Resolve the profile behind an access token.
    async fn current_user(&self, token: &str) -> Result<Profile>;

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    async fn get_profile(&self, user: UserId) -> Result<Profile>;

    /// Create or update the caller's profile row.
    async fn upsert_profile(&self, profile: Profile) -> Result<Profile>;

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    async fn create_project(&self, project: NewProject) -> Result<Project>;

    async fn get_project(&self, id: ProjectId) -> Result<Project>;

    /// Global feed, newest first.
    async fn list_projects(&self, page: Page) -> Result<Vec<Project>>;

    async fn list_projects_by_owner(&self, owner: UserId) -> Result<Vec<Project>>;

    /// Owner-only update of mutable project fields.
    async fn update_project(&self, actor: UserId, project: Project) -> Result<Project>;

    /// Owner-only deletion.
    async fn delete_project(&self, actor: UserId, id: ProjectId) -> Result<()>;

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    async fn add_comment(
        &self,
        project: ProjectId,
        author: UserId,
        content: &str,
    ) -> Result<Comment>;

    async fn list_comments(&self, project: ProjectId, order: CommentOrder) -> Result<Vec<Comment>>;

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    /// Idempotent upsert: if a live (pending or accepted) request already
    /// exists for this (project, requester) pair, that row is returned and
    /// no second row is created.
    async fn create_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<JoinRequest>;

    /// The most recent request for the pair, if any.
    async fn get_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<Option<JoinRequest>>;

    async fn list_join_requests_for_owner(&self, owner: UserId) -> Result<Vec<JoinRequest>>;

    /// Owner-only: `pending -> accepted`, plus a [`ChatParticipant`] row for
    /// the requester as one logical transaction.  If the participant insert
    /// fails the status change is rolled back.
    async fn accept_join_request(&self, actor: UserId, request: RequestId) -> Result<JoinRequest>;

    /// Owner-only: `pending -> rejected`.  No side effect beyond the status.
    async fn reject_join_request(&self, actor: UserId, request: RequestId) -> Result<JoinRequest>;

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    /// Send a message into a group channel or a direct conversation.
    /// Group senders must be participants of the project.
    async fn send_message(
        &self,
        conversation: Conversation,
        sender: UserId,
        content: &str,
    ) -> Result<ChatMessage>;

    /// Messages in the conversation, oldest first within the page.
    async fn list_messages(&self, conversation: Conversation, page: Page)
        -> Result<Vec<ChatMessage>>;

    async fn list_participants(&self, project: ProjectId) -> Result<Vec<ChatParticipant>>;

    async fn get_group_settings(&self, project: ProjectId) -> Result<GroupChatSettings>;

    /// Creator/admin only.
    async fn update_group_settings(
        &self,
        actor: UserId,
        settings: GroupChatSettings,
    ) -> Result<GroupChatSettings>;

    /// Advance the caller's last-read marker for a project channel.
    async fn mark_read(&self, project: ProjectId, user: UserId) -> Result<()>;

    // ------------------------------------------------------------------
    // Presence toggles (like / save / follow)
    // ------------------------------------------------------------------

    /// Flip a presence toggle: insert the row if absent, delete it if
    /// present.  Returns the new presence.  Uniqueness is enforced by the
    /// backend, so concurrent duplicate inserts collapse into one row.
    async fn toggle(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool>;

    async fn is_set(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool>;

    async fn count(&self, kind: ToggleKind, target: ToggleTarget) -> Result<u64>;

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Newest first.
    async fn list_notifications(&self, user: UserId) -> Result<Vec<Notification>>;

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()>;

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Upload a media object and return its public URL.
    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String>;

    // ------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------

    /// Open the backend's change feed.  Each call returns an independent
    /// stream starting at the current position.
    fn changes(&self) -> ChangeStream;
}
