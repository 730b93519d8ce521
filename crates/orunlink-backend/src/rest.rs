//! [`Backend`] implementation against the hosted service.
//!
//! Data operations use the service's REST surface (`/rest/v1/<table>` with
//! query-string filters), auth lives under `/auth/v1`, object storage under
//! `/storage/v1/object`, and the change feed is a newline-delimited JSON
//! stream at `/realtime/v1/changes`.  The row and event formats are owned by
//! the provider; this module only maps them onto the shared models.

use std::sync::RwLock;

use chrono::Utc;
use futures::StreamExt;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use orunlink_shared::models::{
    ChatMessage, ChatParticipant, Comment, GroupChatSettings, JoinRequest, Notification, Profile,
    Project,
};
use orunlink_shared::protocol::{ChangeEvent, Table};
use orunlink_shared::types::{
    Conversation, NotificationId, ProjectId, RequestId, RequestStatus, ToggleKind, ToggleTarget,
    UserId,
};

use crate::error::{BackendError, Result};
use crate::facade::{
    AuthSession, Backend, ChangeStream, CommentOrder, NewProject, Page,
};

/// Connection settings for the hosted service.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL of the service, e.g. `https://orunlink.example.com`.
    pub base_url: String,
    /// Public (anonymous) API key sent with every request.
    pub anon_key: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: String,
    user: Profile,
}

/// The production facade.
pub struct RestBackend {
    http: Client,
    config: RestConfig,
    /// Access token of the signed-in user, if any.  Requests fall back to
    /// the anonymous key when no session is active.
    token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Self {
        Self {
            http: Client::new(),
            config,
            token: RwLock::new(None),
        }
    }

    fn bearer(&self) -> String {
        self.token
            .read()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.config.anon_key.clone())
    }

    fn set_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = token;
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.config.base_url, path))
            .header("apikey", &self.config.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.bearer()))
    }

    fn rest(&self, method: Method, table: Table, query: &str) -> RequestBuilder {
        let path = if query.is_empty() {
            format!("/rest/v1/{}", table.as_str())
        } else {
            format!("/rest/v1/{}?{}", table.as_str(), query)
        };
        self.request(method, &path)
    }

    /// Map an error status to the facade taxonomy; pass successes through.
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        match status {
            s if s.is_success() => Ok(response),
            StatusCode::UNAUTHORIZED => Err(BackendError::Unauthorized),
            StatusCode::FORBIDDEN => Err(BackendError::Forbidden),
            StatusCode::NOT_FOUND => Err(BackendError::NotFound),
            StatusCode::CONFLICT => {
                let detail = response.text().await.unwrap_or_default();
                Err(BackendError::Conflict(detail))
            }
            _ => match response.error_for_status() {
                Err(err) => Err(BackendError::Http(err)),
                Ok(_) => Err(BackendError::Conflict(format!("unexpected status {status}"))),
            },
        }
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, table: Table, query: &str) -> Result<Vec<T>> {
        let response = self.rest(Method::GET, table, query).send().await?;
        let rows = Self::check(response).await?.json().await?;
        Ok(rows)
    }

    async fn fetch_one<T: DeserializeOwned>(&self, table: Table, query: &str) -> Result<T> {
        self.fetch_rows(table, query)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::NotFound)
    }

    /// Insert a row and return the stored representation.
    async fn insert_row<B: Serialize, T: DeserializeOwned>(
        &self,
        table: Table,
        body: &B,
    ) -> Result<T> {
        let response = self
            .rest(Method::POST, table, "")
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let rows: Vec<T> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(BackendError::NotFound)
    }

    async fn patch_rows<B: Serialize, T: DeserializeOwned>(
        &self,
        table: Table,
        query: &str,
        body: &B,
    ) -> Result<Vec<T>> {
        let response = self
            .rest(Method::PATCH, table, query)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await?;
        let rows = Self::check(response).await?.json().await?;
        Ok(rows)
    }

    async fn delete_rows(&self, table: Table, query: &str) -> Result<()> {
        let response = self.rest(Method::DELETE, table, query).send().await?;
        Self::check(response).await?;
        Ok(())
    }

    fn page_query(page: Page) -> String {
        format!("limit={}&offset={}", page.limit, page.offset)
    }
}

#[async_trait::async_trait]
impl Backend for RestBackend {
    // ------------------------------------------------------------------
    // Auth / session
    // ------------------------------------------------------------------

    async fn sign_up(&self, email: &str, password: &str, username: &str) -> Result<AuthSession> {
        let response = self
            .request(Method::POST, "/auth/v1/signup")
            .json(&json!({
                "email": email,
                "password": password,
                "data": { "username": username },
            }))
            .send()
            .await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY
            || response.status() == StatusCode::CONFLICT
        {
            return Err(BackendError::DuplicateUser);
        }
        let auth: AuthResponse = Self::check(response).await?.json().await?;
        self.set_token(Some(auth.access_token.clone()));
        Ok(AuthSession {
            user: auth.user,
            access_token: auth.access_token,
        })
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession> {
        let response = self
            .request(Method::POST, "/auth/v1/token?grant_type=password")
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNAUTHORIZED
        {
            return Err(BackendError::InvalidCredentials);
        }
        let auth: AuthResponse = Self::check(response).await?.json().await?;
        self.set_token(Some(auth.access_token.clone()));
        Ok(AuthSession {
            user: auth.user,
            access_token: auth.access_token,
        })
    }

    async fn sign_out(&self, _token: &str) -> Result<()> {
        let response = self.request(Method::POST, "/auth/v1/logout").send().await?;
        self.set_token(None);
        Self::check(response).await?;
        Ok(())
    }

    async fn current_user(&self, token: &str) -> Result<Profile> {
        let response = self
            .http
            .get(format!("{}/auth/v1/user", self.config.base_url))
            .header("apikey", &self.config.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .send()
            .await?;
        let profile = Self::check(response).await?.json().await?;
        Ok(profile)
    }

    // ------------------------------------------------------------------
    // Profiles
    // ------------------------------------------------------------------

    async fn get_profile(&self, user: UserId) -> Result<Profile> {
        self.fetch_one(Table::Profiles, &format!("id=eq.{user}")).await
    }

    async fn upsert_profile(&self, profile: Profile) -> Result<Profile> {
        let response = self
            .rest(Method::POST, Table::Profiles, "on_conflict=id")
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&profile)
            .send()
            .await?;
        let rows: Vec<Profile> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(BackendError::NotFound)
    }

    // ------------------------------------------------------------------
    // Projects
    // ------------------------------------------------------------------

    async fn create_project(&self, project: NewProject) -> Result<Project> {
        self.insert_row(Table::Projects, &project).await
    }

    async fn get_project(&self, id: ProjectId) -> Result<Project> {
        self.fetch_one(Table::Projects, &format!("id=eq.{id}")).await
    }

    async fn list_projects(&self, page: Page) -> Result<Vec<Project>> {
        self.fetch_rows(
            Table::Projects,
            &format!("order=created_at.desc&{}", Self::page_query(page)),
        )
        .await
    }

    async fn list_projects_by_owner(&self, owner: UserId) -> Result<Vec<Project>> {
        self.fetch_rows(
            Table::Projects,
            &format!("owner=eq.{owner}&order=created_at.desc"),
        )
        .await
    }

    async fn update_project(&self, _actor: UserId, project: Project) -> Result<Project> {
        // Ownership is enforced by the backend's row policies; a non-owner
        // patch matches zero rows.
        self.patch_rows(Table::Projects, &format!("id=eq.{}", project.id), &project)
            .await?
            .into_iter()
            .next()
            .ok_or(BackendError::Forbidden)
    }

    async fn delete_project(&self, _actor: UserId, id: ProjectId) -> Result<()> {
        self.delete_rows(Table::Projects, &format!("id=eq.{id}")).await
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
        self.insert_row(
            Table::Comments,
            &json!({
                "project": project,
                "author": author,
                "content": content,
            }),
        )
        .await
    }

    async fn list_comments(&self, project: ProjectId, order: CommentOrder) -> Result<Vec<Comment>> {
        let direction = match order {
            CommentOrder::NewestFirst => "desc",
            CommentOrder::OldestFirst => "asc",
        };
        self.fetch_rows(
            Table::Comments,
            &format!("project=eq.{project}&order=created_at.{direction}"),
        )
        .await
    }

    // ------------------------------------------------------------------
    // Join requests
    // ------------------------------------------------------------------

    async fn create_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<JoinRequest> {
        // Uniqueness of a live request per (project, requester) is a
        // backend constraint; merge-duplicates makes retries and races
        // return the existing row instead of erroring.
        let response = self
            .rest(
                Method::POST,
                Table::JoinRequests,
                "on_conflict=project,requester",
            )
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .json(&json!({
                "project": project,
                "requester": requester,
                "status": RequestStatus::Pending,
            }))
            .send()
            .await?;
        let rows: Vec<JoinRequest> = Self::check(response).await?.json().await?;
        rows.into_iter().next().ok_or(BackendError::NotFound)
    }

    async fn get_join_request(
        &self,
        project: ProjectId,
        requester: UserId,
    ) -> Result<Option<JoinRequest>> {
        let rows: Vec<JoinRequest> = self
            .fetch_rows(
                Table::JoinRequests,
                &format!(
                    "project=eq.{project}&requester=eq.{requester}&order=created_at.desc&limit=1"
                ),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_join_requests_for_owner(&self, owner: UserId) -> Result<Vec<JoinRequest>> {
        self.fetch_rows(
            Table::JoinRequests,
            &format!("owner=eq.{owner}&order=created_at.desc"),
        )
        .await
    }

    async fn accept_join_request(&self, _actor: UserId, request: RequestId) -> Result<JoinRequest> {
        // Status flip first, membership second; a failed membership insert
        // rolls the status back so the pair stays consistent.
        let accepted: JoinRequest = self
            .patch_rows(
                Table::JoinRequests,
                &format!("id=eq.{request}&status=eq.pending"),
                &json!({
                    "status": RequestStatus::Accepted,
                    "decided_at": Utc::now(),
                }),
            )
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Conflict("request is not pending".into()))?;

        let membership: Result<ChatParticipant> = self
            .insert_row(
                Table::ChatParticipants,
                &json!({
                    "project": accepted.project,
                    "user": accepted.requester,
                    "role": "member",
                }),
            )
            .await;

        if let Err(e) = membership {
            tracing::error!(request = %request, error = %e, "membership insert failed, rolling back accept");
            let _: Vec<JoinRequest> = self
                .patch_rows(
                    Table::JoinRequests,
                    &format!("id=eq.{request}"),
                    &json!({ "status": RequestStatus::Pending, "decided_at": null }),
                )
                .await?;
            return Err(e);
        }

        Ok(accepted)
    }

    async fn reject_join_request(&self, _actor: UserId, request: RequestId) -> Result<JoinRequest> {
        self.patch_rows(
            Table::JoinRequests,
            &format!("id=eq.{request}&status=eq.pending"),
            &json!({
                "status": RequestStatus::Rejected,
                "decided_at": Utc::now(),
            }),
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::Conflict("request is not pending".into()))
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
        let (project, recipient) = match conversation {
            Conversation::Project(p) => (Some(p), None),
            Conversation::Direct { a, b } => (None, Some(if sender == a { b } else { a })),
        };
        self.insert_row(
            Table::ChatMessages,
            &json!({
                "conversation": conversation.key(),
                "project": project,
                "sender": sender,
                "recipient": recipient,
                "content": content,
            }),
        )
        .await
    }

    async fn list_messages(
        &self,
        conversation: Conversation,
        page: Page,
    ) -> Result<Vec<ChatMessage>> {
        self.fetch_rows(
            Table::ChatMessages,
            &format!(
                "conversation=eq.{}&order=created_at.asc&{}",
                conversation.key(),
                Self::page_query(page)
            ),
        )
        .await
    }

    async fn list_participants(&self, project: ProjectId) -> Result<Vec<ChatParticipant>> {
        self.fetch_rows(Table::ChatParticipants, &format!("project=eq.{project}"))
            .await
    }

    async fn get_group_settings(&self, project: ProjectId) -> Result<GroupChatSettings> {
        self.fetch_one(Table::GroupChatSettings, &format!("project=eq.{project}"))
            .await
    }

    async fn update_group_settings(
        &self,
        _actor: UserId,
        settings: GroupChatSettings,
    ) -> Result<GroupChatSettings> {
        self.patch_rows(
            Table::GroupChatSettings,
            &format!("project=eq.{}", settings.project),
            &settings,
        )
        .await?
        .into_iter()
        .next()
        .ok_or(BackendError::Forbidden)
    }

    async fn mark_read(&self, project: ProjectId, user: UserId) -> Result<()> {
        let _: Vec<ChatParticipant> = self
            .patch_rows(
                Table::ChatParticipants,
                &format!("project=eq.{project}&user=eq.{user}"),
                &json!({ "last_read_at": Utc::now() }),
            )
            .await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Presence toggles
    // ------------------------------------------------------------------

    async fn toggle(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool> {
        let table = toggle_table(kind);
        let query = format!("user=eq.{}&target=eq.{}", user, target.id());
        if self.is_set(kind, user, target).await? {
            self.delete_rows(table, &query).await?;
            Ok(false)
        } else {
            // Duplicate inserts from a concurrent toggle collapse on the
            // backend's (user, target) uniqueness constraint.
            let response = self
                .rest(Method::POST, table, "on_conflict=user,target")
                .header("Prefer", "resolution=ignore-duplicates")
                .json(&json!({ "user": user, "target": target.id() }))
                .send()
                .await?;
            Self::check(response).await?;
            Ok(true)
        }
    }

    async fn is_set(&self, kind: ToggleKind, user: UserId, target: ToggleTarget) -> Result<bool> {
        let rows: Vec<serde_json::Value> = self
            .fetch_rows(
                toggle_table(kind),
                &format!("user=eq.{}&target=eq.{}&limit=1", user, target.id()),
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn count(&self, kind: ToggleKind, target: ToggleTarget) -> Result<u64> {
        let rows: Vec<serde_json::Value> = self
            .fetch_rows(toggle_table(kind), &format!("target=eq.{}", target.id()))
            .await?;
        Ok(rows.len() as u64)
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    async fn list_notifications(&self, user: UserId) -> Result<Vec<Notification>> {
        self.fetch_rows(
            Table::Notifications,
            &format!("recipient=eq.{user}&order=created_at.desc"),
        )
        .await
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()> {
        let _: Vec<Notification> = self
            .patch_rows(
                Table::Notifications,
                &format!("id=eq.{id}"),
                &json!({ "read": true }),
            )
            .await?;
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
        let response = self
            .request(Method::POST, &format!("/storage/v1/object/{bucket}/{path}"))
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(format!(
            "{}/storage/v1/object/public/{bucket}/{path}",
            self.config.base_url
        ))
    }

    // ------------------------------------------------------------------
    // Realtime
    // ------------------------------------------------------------------

    fn changes(&self) -> ChangeStream {
        let request = self
            .request(Method::GET, "/realtime/v1/changes")
            .header(header::ACCEPT, "application/x-ndjson");

        // One JSON change event per line; unparsable lines are dropped with
        // a log so a malformed event cannot wedge the stream.
        let lines = async_stream_lines(request);
        Box::pin(lines.filter_map(|line| async move {
            if line.is_empty() {
                return None;
            }
            match serde_json::from_slice::<ChangeEvent>(&line) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed change event");
                    None
                }
            }
        }))
    }
}

fn toggle_table(kind: ToggleKind) -> Table {
    match kind {
        ToggleKind::Like => Table::Likes,
        ToggleKind::Save => Table::Saves,
        ToggleKind::Follow => Table::Follows,
    }
}

/// Turn a streaming response body into newline-delimited chunks.
fn async_stream_lines(
    request: RequestBuilder,
) -> impl futures::Stream<Item = Vec<u8>> + Send {
    futures::stream::unfold(LineState::Pending(request), |state| async move {
        let mut state = match state {
            LineState::Pending(request) => match request.send().await {
                Ok(response) => LineState::Open {
                    body: Box::pin(response.bytes_stream()),
                    buffer: Vec::new(),
                },
                Err(e) => {
                    tracing::error!(error = %e, "change feed connection failed");
                    return None;
                }
            },
            open => open,
        };

        loop {
            if let LineState::Open { body, buffer } = &mut state {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = buffer.drain(..=pos).collect();
                    line.pop();
                    return Some((line, state));
                }
                match body.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "change feed stream error");
                        return None;
                    }
                    None => {
                        if buffer.is_empty() {
                            return None;
                        }
                        let line = std::mem::take(buffer);
                        return Some((line, state));
                    }
                }
            } else {
                return None;
            }
        }
    })
}

enum LineState {
    Pending(RequestBuilder),
    Open {
        body: std::pin::Pin<
            Box<dyn futures::Stream<Item = reqwest::Result<bytes::Bytes>> + Send>,
        >,
        buffer: Vec<u8>,
    },
}
