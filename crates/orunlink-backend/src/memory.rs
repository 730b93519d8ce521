//! In-memory [`Backend`] implementation.
//!
//! Used for local development and tests.  Behaves like the hosted service
//! where it matters to callers: every mutation is echoed on the change feed,
//! uniqueness constraints are enforced server-side (single presence row per
//! toggle pair, single live join request per pair), and owner/role checks
//! are applied before mutation.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use orunlink_shared::constants::{
    FEED_SOURCE_CAPACITY, MAX_COMMENT_LEN, MAX_MESSAGE_LEN, MAX_UPLOAD_SIZE,
};
use orunlink_shared::models::{
    ChatMessage, ChatParticipant, Comment, GroupChatSettings, JoinRequest, Notification,
    NotificationKind, Profile, Project, ToggleRow,
};
use orunlink_shared::protocol::{ChangeEvent, ChangeOp, Table};
use orunlink_shared::types::{
    CommentId, Conversation, MessageId, NotificationId, ParticipantRole, ProjectId, RequestId,
    RequestStatus, ToggleKind, ToggleTarget, UserId,
};

use crate::error::{BackendError, Result};
use crate::facade::{
    AuthSession, Backend, ChangeStream, CommentOrder, NewProject, Page,
};

struct AuthRecord {
    user: UserId,
    password: String,
}

struct StoredObject {
    #[allow(dead_code)]
    bytes: Vec<u8>,
    #[allow(dead_code)]
    content_type: String,
}

#[derive(Default)]
struct Tables {
    /// email -> auth record
    auth: HashMap<String, AuthRecord>,
    /// access token -> user
    sessions: HashMap<String, UserId>,
    profiles: HashMap<UserId, Profile>,
    projects: HashMap<ProjectId, Project>,
    comments: Vec<Comment>,
    join_requests: Vec<JoinRequest>,
    messages: Vec<ChatMessage>,
    participants: Vec<ChatParticipant>,
    group_settings: HashMap<ProjectId, GroupChatSettings>,
    /// presence rows per toggle kind
    toggles: HashMap<ToggleKind, HashSet<(UserId, Uuid)>>,
    notifications: Vec<Notification>,
    /// public URL -> stored object
    objects: HashMap<String, StoredObject>,
}

/// The mock backend.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_SOURCE_CAPACITY);
        Self {
            tables: Mutex::new(Tables::default()),
            feed,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Echo a row change on the feed.  No receivers is fine; nobody may be
    /// listening yet.
    fn emit<T: Serialize>(&self, table: Table, op: ChangeOp, row: &T) {
        match serde_json::to_value(row) {
            Ok(row) => {
                let _ = self.feed.send(ChangeEvent {
                    table,
                    op,
                    row,
                    committed_at: Utc::now(),
                });
            }
            Err(e) => tracing::error!(table = %table, error = %e, "failed to encode change event"),
        }
    }

    /// Create a notification row unless the actor is notifying themselves.
    /// Returns the row for feed emission.
    fn notify(
        tables: &mut Tables,
        recipient: UserId,
        actor: UserId,
        kind: NotificationKind,
        project: Option<ProjectId>,
    ) -> Option<Notification> {
        if recipient == actor {
            return None;
        }
        let notification = Notification {
            id: NotificationId::new(),
            recipient,
            actor,
            kind,
            project,
            read: false,
            created_at: Utc::now(),
        };
        tables.notifications.push(notification.clone());
        Some(notification)
    }

    fn toggle_table(kind: ToggleKind) -> Table {
        match kind {
            ToggleKind::Like => Table::Likes,
            ToggleKind::Save => Table::Saves,
            ToggleKind::Follow => Table::Follows,
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    // ------------------------------------------------------------------
    // Auth / session
    // ------------------------------------------------------------------

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<AuthSession> {
        if !email.contains('@') {
            return Err(BackendError::Validation("invalid email".into()));
        }
        if username.trim().is_empty() {
            return Err(BackendError::Validation("username is required".into()));
        }

        let (profile, token);
        {
            let mut tables = self.lock();
            if tables.auth.contains_key(email)
                || tables.profiles.values().any(|p| p.username == username)
            {
                return Err(BackendError::DuplicateUser);
            }

            let user = UserId::new();
            let now = Utc::now();
            profile = Profile {
                id: user,
                username: username.to_string(),
                display_name: None,
                bio: None,
                avatar_url: None,
                created_at: now,
                updated_at: now,
            };
            tables.auth.insert(
                email.to_string(),
                AuthRecord {
                    user,
                    password: password.to_string(),
                },
            );
            tables.profiles.insert(user, profile.clone());

            token = Uuid::new_v4().to_string();
            tables.sessions.insert(token.clone(), user);
        }

        self.emit(Table::Profiles, ChangeOp::Insert, &profile);
        tracing::info!(user = %profile.id, "signed up");
        Ok(AuthSession {
            user: profile,
            access_token: token,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let mut tables = self.lock();
        let record = tables
            .auth
            .get(email)
            .ok_or(BackendError::InvalidCredentials)?;
        if record.password != password {
            return Err(BackendError::InvalidCredentials);
        }
        let user = record.user;
        let profile = tables
            .profiles
            .get(&user)
            .cloned()
            .ok_or(BackendError::NotFound)?;

        let token = Uuid::new_v4().to_string();
        tables.sessions.insert(token.clone(), user);
        Ok(AuthSession {
            user: profile,
            access_token: token,
        })
    }

    async fn sign_out(&self, token: &str) -> Result<()> {
        self.lock().sessions.remove(token);
        Ok(())
    }

    async fn current_user(&self, token: &str) -> Result<Profile> {
        let tables = self.lock();
        let user = tables
            .sessions
            .get(token)
            .copied()
            .ok_or(BackendError::Unauthorized)?;
        tables
            .profiles
            .get(&user)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    async fn get_profile(&self, user: UserId) -> Result<Profile> {
        self.lock()
            .profiles
            .get(&user)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<Profile> {
        let (stored, op);
        {
            let mut tables = self.lock();
            let taken = tables
                .profiles
                .values()
                .any(|p| p.username == profile.username && p.id != profile.id);
            if taken {
                return Err(BackendError::Conflict("username already taken".into()));
            }
            op = if tables.profiles.contains_key(&profile.id) {
                ChangeOp::Update
            } else {
                ChangeOp::Insert
            };
            stored = Profile {
                updated_at: Utc::now(),
                ..profile
            };
            tables.profiles.insert(stored.id, stored.clone());
        }
        self.emit(Table::Profiles, op, &stored);
        Ok(stored)
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        if project.title.trim().is_empty() {
            return Err(BackendError::Validation("title is required".into()));
        }

        let (stored, participant, settings);
        {
            let mut tables = self.lock();
            if !tables.profiles.contains_key(&project.owner) {
                return Err(BackendError::NotFound);
            }
            let now = Utc::now();
            stored = Project {
                id: ProjectId::new(),
                owner: project.owner,
                title: project.title,
                description: project.description,
                category: project.category,
                tags: project.tags,
                main_image_url: project.main_image_url,
                media_urls: project.media_urls,
                like_count: 0,
                comment_count: 0,
                created_at: now,
                updated_at: now,
            };
            tables.projects.insert(stored.id, stored.clone());

            // The owner is auto-added as creator of the project channel.
            participant = ChatParticipant {
                project: stored.id,
                user: stored.owner,
                role: ParticipantRole::Creator,
                joined_at: now,
                last_read_at: None,
            };
            tables.participants.push(participant.clone());

            settings = GroupChatSettings {
                project: stored.id,
                title: stored.title.clone(),
                description: None,
                avatar_url: None,
                theme_color: None,
                background: None,
                notifications_enabled: true,
                updated_at: now,
            };
            tables.group_settings.insert(stored.id, settings.clone());
        }

        self.emit(Table::Projects, ChangeOp::Insert, &stored);
        self.emit(Table::ChatParticipants, ChangeOp::Insert, &participant);
        self.emit(Table::GroupChatSettings, ChangeOp::Insert, &settings);
        tracing::info!(project = %stored.id, owner = %stored.owner, "project created");
        Ok(stored)
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.lock()
            .projects
            .get(&id)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn list_projects(&self, page: Page) -> Result<Vec<Project>> {
        let tables = self.lock();
        let mut projects: Vec<Project> = tables.projects.values().cloned().collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn list_projects_by_owner(&self, owner: UserId) -> Result<Vec<Project>> {
        let tables = self.lock();
        let mut projects: Vec<Project> = tables
            .projects
            .values()
            .filter(|p| p.owner == owner)
            .cloned()
            .collect();
        projects.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(projects)
    }

    async fn update_project(&self, actor: UserId, project: Project) -> Result<Project> {
        let stored;
        {
            let mut tables = self.lock();
            let existing = tables
                .projects
                .get(&project.id)
                .ok_or(BackendError::NotFound)?;
            if existing.owner != actor {
                return Err(BackendError::Forbidden);
            }
            // Counters and provenance stay server-owned.
            stored = Project {
                owner: existing.owner,
                like_count: existing.like_count,
                comment_count: existing.comment_count,
                created_at: existing.created_at,
                updated_at: Utc::now(),
                ..project
            };
            tables.projects.insert(stored.id, stored.clone());
        }
        self.emit(Table::Projects, ChangeOp::Update, &stored);
        Ok(stored)
    }

    async fn delete_project(&self, actor: UserId, id: ProjectId) -> Result<()> {
        let removed;
        {
            let mut tables = self.lock();
            let existing = tables.projects.get(&id).ok_or(BackendError::NotFound)?;
            if existing.owner != actor {
                return Err(BackendError::Forbidden);
            }
            removed = tables.projects.remove(&id).ok_or(BackendError::NotFound)?;

            // Server-side cascade.
            let key = Conversation::Project(id).key();
            tables.comments.retain(|c| c.project != id);
            tables.participants.retain(|p| p.project != id);
            tables.group_settings.remove(&id);
            tables.join_requests.retain(|r| r.project != id);
            tables.messages.retain(|m| m.conversation != key);
            for set in tables.toggles.values_mut() {
                set.retain(|(_, target)| *target != id.0);
            }
        }
        self.emit(Table::Projects, ChangeOp::Delete, &removed);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Comments
    // ------------------------------------------------------------------

    async fn add_comment(
        &self,
        project: ProjectId,
        author: UserId,
        content: &str,
    ) -> Result<Comment> {
        if content.trim().is_empty() {
            return Err(BackendError::Validation("comment is empty".into()));
        }
        if content.len() > MAX_COMMENT_LEN {
            return Err(BackendError::Validation("comment is too long".into()));
        }

        let (comment, updated_project, notification);
        {
            let mut tables = self.lock();
            let owner = {
                let proj = tables
                    .projects
                    .get_mut(&project)
                    .ok_or(BackendError::NotFound)?;
                proj.comment_count += 1;
                proj.owner
            };
            updated_project = tables.projects.get(&project).cloned();

            comment = Comment {
                id: CommentId::new(),
                project,
                author,
                content: content.to_string(),
                like_count: 0,
                created_at: Utc::now(),
            };
            tables.comments.push(comment.clone());
            notification =
                Self::notify(&mut tables, owner, author, NotificationKind::Comment, Some(project));
        }

        self.emit(Table::Comments, ChangeOp::Insert, &comment);
        if let Some(project) = &updated_project {
            self.emit(Table::Projects, ChangeOp::Update, project);
        }
        if let Some(n) = &notification {
            self.emit(Table::Notifications, ChangeOp::Insert, n);
        }
        Ok(comment)
    }

    async fn list_comments(&self, project: ProjectId, order: CommentOrder) -> Result<Vec<Comment>> {
        let tables = self.lock();
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.project == project)
            .cloned()
            .collect();
        match order {
            CommentOrder::NewestFirst => comments.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            CommentOrder::OldestFirst => comments.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        Ok(comments)
    }

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    async fn create_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<JoinRequest> {
        let (request, notification);
        {
            let mut tables = self.lock();
            let owner = tables
                .projects
                .get(&project)
                .ok_or(BackendError::NotFound)?
                .owner;
            if owner == requester {
                return Err(BackendError::Validation(
                    "the owner cannot request to join their own project".into(),
                ));
            }

            // Upsert: a live (pending or accepted) request for the pair is
            // returned as-is.  Only after a rejection may a new row appear.
            if let Some(existing) = tables
                .join_requests
                .iter()
                .filter(|r| r.project == project && r.requester == requester)
                .max_by_key(|r| r.created_at)
            {
                if existing.status != RequestStatus::Rejected {
                    tracing::debug!(request = %existing.id, "join request already live");
                    return Ok(existing.clone());
                }
            }

            request = JoinRequest {
                id: RequestId::new(),
                project,
                requester,
                owner,
                status: RequestStatus::Pending,
                created_at: Utc::now(),
                decided_at: None,
            };
            tables.join_requests.push(request.clone());
            notification = Self::notify(
                &mut tables,
                owner,
                requester,
                NotificationKind::JoinRequestReceived,
                Some(project),
            );
        }

        self.emit(Table::JoinRequests, ChangeOp::Insert, &request);
        if let Some(n) = &notification {
            self.emit(Table::Notifications, ChangeOp::Insert, n);
        }
        Ok(request)
    }

    async fn get_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<Option<JoinRequest>> {
        let tables = self.lock();
        Ok(tables
            .join_requests
            .iter()
            .filter(|r| r.project == project && r.requester == requester)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn list_join_requests_for_owner(&self, owner: UserId) -> Result<Vec<JoinRequest>> {
        let tables = self.lock();
        let mut requests: Vec<JoinRequest> = tables
            .join_requests
            .iter()
            .filter(|r| r.owner == owner)
            .cloned()
            .collect();
        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    async fn accept_join_request(&self, actor: UserId, request: RequestId) -> Result<JoinRequest> {
        let (updated, participant, notification);
        {
            let mut tables = self.lock();
            let req = tables
                .join_requests
                .iter_mut()
                .find(|r| r.id == request)
                .ok_or(BackendError::NotFound)?;
            if req.owner != actor {
                return Err(BackendError::Forbidden);
            }
            if req.status != RequestStatus::Pending {
                return Err(BackendError::Conflict(format!(
                    "request is already {}",
                    req.status
                )));
            }
            req.status = RequestStatus::Accepted;
            req.decided_at = Some(Utc::now());
            updated = req.clone();

            // Both halves of the accept happen under the same lock, so the
            // status flip and the membership row commit together.
            let already_member = tables
                .participants
                .iter()
                .any(|p| p.project == updated.project && p.user == updated.requester);
            participant = if already_member {
                None
            } else {
                let row = ChatParticipant {
                    project: updated.project,
                    user: updated.requester,
                    role: ParticipantRole::Member,
                    joined_at: Utc::now(),
                    last_read_at: None,
                };
                tables.participants.push(row.clone());
                Some(row)
            };
            notification = Self::notify(
                &mut tables,
                updated.requester,
                actor,
                NotificationKind::JoinRequestAccepted,
                Some(updated.project),
            );
        }

        self.emit(Table::JoinRequests, ChangeOp::Update, &updated);
        if let Some(p) = &participant {
            self.emit(Table::ChatParticipants, ChangeOp::Insert, p);
        }
        if let Some(n) = &notification {
            self.emit(Table::Notifications, ChangeOp::Insert, n);
        }
        tracing::info!(request = %updated.id, "join request accepted");
        Ok(updated)
    }

    async fn reject_join_request(&self, actor: UserId, request: RequestId) -> Result<JoinRequest> {
        let updated;
        {
            let mut tables = self.lock();
            let req = tables
                .join_requests
                .iter_mut()
                .find(|r| r.id == request)
                .ok_or(BackendError::NotFound)?;
            if req.owner != actor {
                return Err(BackendError::Forbidden);
            }
            if req.status != RequestStatus::Pending {
                return Err(BackendError::Conflict(format!(
                    "request is already {}",
                    req.status
                )));
            }
            req.status = RequestStatus::Rejected;
            req.decided_at = Some(Utc::now());
            updated = req.clone();
        }
        self.emit(Table::JoinRequests, ChangeOp::Update, &updated);
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Chat
    // ------------------------------------------------------------------

    async fn send_message(
        &self,
        conversation: Conversation,
        sender: UserId,
        content: &str,
    ) -> Result<ChatMessage> {
        if content.trim().is_empty() {
            return Err(BackendError::Validation("message is empty".into()));
        }
        if content.len() > MAX_MESSAGE_LEN {
            return Err(BackendError::Validation("message is too long".into()));
        }

        let message;
        {
            let mut tables = self.lock();
            let (project, recipient) = match conversation {
                Conversation::Project(project) => {
                    let is_member = tables
                        .participants
                        .iter()
                        .any(|p| p.project == project && p.user == sender);
                    if !is_member {
                        return Err(BackendError::Forbidden);
                    }
                    (Some(project), None)
                }
                Conversation::Direct { a, b } => {
                    let other = if sender == a { b } else { a };
                    if sender != a && sender != b {
                        return Err(BackendError::Forbidden);
                    }
                    (None, Some(other))
                }
            };

            message = ChatMessage {
                id: MessageId::new(),
                conversation: conversation.key(),
                project,
                sender,
                recipient,
                content: content.to_string(),
                created_at: Utc::now(),
            };
            tables.messages.push(message.clone());
        }

        self.emit(Table::ChatMessages, ChangeOp::Insert, &message);
        Ok(message)
    }

    async fn list_messages(
        &self,
        conversation: Conversation,
        page: Page,
    ) -> Result<Vec<ChatMessage>> {
        let key = conversation.key();
        let tables = self.lock();
        let mut messages: Vec<ChatMessage> = tables
            .messages
            .iter()
            .filter(|m| m.conversation == key)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn list_participants(&self, project: ProjectId) -> Result<Vec<ChatParticipant>> {
        let tables = self.lock();
        Ok(tables
            .participants
            .iter()
            .filter(|p| p.project == project)
            .cloned()
            .collect())
    }

    async fn get_group_settings(&self, project: ProjectId) -> Result<GroupChatSettings> {
        self.lock()
            .group_settings
            .get(&project)
            .cloned()
            .ok_or(BackendError::NotFound)
    }

    async fn update_group_settings(
        &self,
        actor: UserId,
        settings: GroupChatSettings,
    ) -> Result<GroupChatSettings> {
        let stored;
        {
            let mut tables = self.lock();
            let role = tables
                .participants
                .iter()
                .find(|p| p.project == settings.project && p.user == actor)
                .map(|p| p.role)
                .ok_or(BackendError::Forbidden)?;
            if !role.can_edit_settings() {
                return Err(BackendError::Forbidden);
            }
            if !tables.group_settings.contains_key(&settings.project) {
                return Err(BackendError::NotFound);
            }
            stored = GroupChatSettings {
                updated_at: Utc::now(),
                ..settings
            };
            tables.group_settings.insert(stored.project, stored.clone());
        }
        self.emit(Table::GroupChatSettings, ChangeOp::Update, &stored);
        Ok(stored)
    }

    async fn mark_read(&self, project: ProjectId, user: UserId) -> Result<()> {
        let updated;
        {
            let mut tables = self.lock();
            let participant = tables
                .participants
                .iter_mut()
                .find(|p| p.project == project && p.user == user)
                .ok_or(BackendError::NotFound)?;
            participant.last_read_at = Some(Utc::now());
            updated = participant.clone();
        }
        self.emit(Table::ChatParticipants, ChangeOp::Update, &updated);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence toggles
    // ------------------------------------------------------------------

    async fn toggle(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool> {
        let (present, row, updated_project, notification);
        {
            let mut tables = self.lock();
            if let ToggleTarget::Project(project) = target {
                if !tables.projects.contains_key(&project) {
                    return Err(BackendError::NotFound);
                }
            }

            let set = tables.toggles.entry(kind).or_default();
            let pair = (user, target.id());
            // Row presence is the state: insert if absent, delete if present.
            present = if set.remove(&pair) {
                false
            } else {
                set.insert(pair);
                true
            };
            row = ToggleRow {
                user,
                target: target.id(),
                created_at: Utc::now(),
            };

            // Likes keep the project's derived counter in step.
            updated_project = match (kind, target) {
                (ToggleKind::Like, ToggleTarget::Project(project)) => {
                    if let Some(proj) = tables.projects.get_mut(&project) {
                        proj.like_count += if present { 1 } else { -1 };
                        Some(proj.clone())
                    } else {
                        None
                    }
                }
                _ => None,
            };

            notification = match (kind, target, present) {
                (ToggleKind::Like, ToggleTarget::Project(project), true) => {
                    let owner = tables.projects.get(&project).map(|p| p.owner);
                    owner.and_then(|owner| {
                        Self::notify(&mut tables, owner, user, NotificationKind::Like, Some(project))
                    })
                }
                _ => None,
            };
        }

        let op = if present {
            ChangeOp::Insert
        } else {
            ChangeOp::Delete
        };
        self.emit(Self::toggle_table(kind), op, &row);
        if let Some(project) = &updated_project {
            self.emit(Table::Projects, ChangeOp::Update, project);
        }
        if let Some(n) = &notification {
            self.emit(Table::Notifications, ChangeOp::Insert, n);
        }
        Ok(present)
    }

    async fn is_set(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool> {
        let tables = self.lock();
        Ok(tables
            .toggles
            .get(&kind)
            .map(|set| set.contains(&(user, target.id())))
            .unwrap_or(false))
    }

    async fn count(&self, kind: ToggleKind, target: ToggleTarget) -> Result<u64> {
        let tables = self.lock();
        Ok(tables
            .toggles
            .get(&kind)
            .map(|set| set.iter().filter(|(_, t)| *t == target.id()).count() as u64)
            .unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    async fn list_notifications(&self, user: UserId) -> Result<Vec<Notification>> {
        let tables = self.lock();
        let mut notifications: Vec<Notification> = tables
            .notifications
            .iter()
            .filter(|n| n.recipient == user)
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(notifications)
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()> {
        let updated;
        {
            let mut tables = self.lock();
            let notification = tables
                .notifications
                .iter_mut()
                .find(|n| n.id == id)
                .ok_or(BackendError::NotFound)?;
            notification.read = true;
            updated = notification.clone();
        }
        self.emit(Table::Notifications, ChangeOp::Update, &updated);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        if bytes.len() > MAX_UPLOAD_SIZE {
            return Err(BackendError::Validation("file is too large".into()));
        }
        let url = format!("orunlink://storage/{bucket}/{path}");
        self.lock().objects.insert(
            url.clone(),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(url)
    }

    // ------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------

    fn changes(&self) -> ChangeStream {
        let rx = self.feed.subscribe();
        Box::pin(futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "change feed receiver lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }
}
