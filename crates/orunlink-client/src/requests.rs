//! Join-request state machine, viewer side and owner side.
//!
//! `none -> pending -> {accepted, rejected}`; the terminal states admit no
//! further transitions.  Creation is an idempotent upsert on the backend, so
//! a duplicate "request to join" can never produce a second pending row.

use std::sync::Arc;

use tracing::warn;

use orunlink_backend::Backend;
use orunlink_feed::{FeedHandle, Subscription};
use orunlink_shared::models::JoinRequest;
use orunlink_shared::protocol::{ChangeEvent, Scope, Table};
use orunlink_shared::types::{ProjectId, RequestId, RequestStatus, UserId};

use crate::error::Result;
use crate::events::{RequestResolvedPayload, UiEvent, UiEventBus};
use crate::optimistic;

/// The join-request state as the viewer's button renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    NotRequested,
    Pending,
    Accepted,
    Rejected,
}

impl From<RequestStatus> for JoinState {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Pending => Self::Pending,
            RequestStatus::Accepted => Self::Accepted,
            RequestStatus::Rejected => Self::Rejected,
        }
    }
}

// ---------------------------------------------------------------------------
// Viewer side
// ---------------------------------------------------------------------------

/// The "request to join" control for one (project, viewer) pair.
pub struct JoinRequestFlow {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    project: ProjectId,
    viewer: UserId,
    state: JoinState,
    request: Option<JoinRequest>,
}

impl JoinRequestFlow {
    /// Derive the visible state from the backend.
    pub async fn load(
        backend: Arc<dyn Backend>,
        events: UiEventBus,
        project: ProjectId,
        viewer: UserId,
    ) -> Result<Self> {
        let request = backend.get_join_request(project, viewer).await?;
        let state = request
            .as_ref()
            .map(|r| JoinState::from(r.status))
            .unwrap_or(JoinState::NotRequested);
        Ok(Self {
            backend,
            events,
            project,
            viewer,
            state,
            request,
        })
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn request(&self) -> Option<&JoinRequest> {
        self.request.as_ref()
    }

    /// `none -> pending`.  The button flips before the call resolves; a
    /// rejection rolls it back and surfaces the error.  Calling this while
    /// already pending or accepted is a no-op.
    pub async fn request_to_join(&mut self) -> Result<()> {
        if matches!(self.state, JoinState::Pending | JoinState::Accepted) {
            return Ok(());
        }

        let result = optimistic::apply(
            &mut self.state,
            JoinState::Pending,
            self.backend.create_join_request(self.project, self.viewer),
        )
        .await;

        match result {
            Ok(request) => {
                // The upsert may have returned an older live row; render
                // whatever the backend says the state is.
                self.state = request.status.into();
                self.request = Some(request);
                Ok(())
            }
            Err(e) => {
                self.events.error("request to join", &e);
                Err(e)
            }
        }
    }

    /// Reconcile against a realtime event for this pair's request row.
    pub fn apply_event(&mut self, event: &ChangeEvent) {
        if event.table != Table::JoinRequests {
            return;
        }
        let row: JoinRequest = match event.decode() {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "dropping undecodable join-request event");
                return;
            }
        };
        if row.project != self.project || row.requester != self.viewer {
            return;
        }
        self.state = row.status.into();
        self.request = Some(row);
    }

    /// Re-derive the state from the backend.
    pub async fn refresh(&mut self) -> Result<()> {
        self.request = self
            .backend
            .get_join_request(self.project, self.viewer)
            .await?;
        self.state = self
            .request
            .as_ref()
            .map(|r| JoinState::from(r.status))
            .unwrap_or(JoinState::NotRequested);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Owner side
// ---------------------------------------------------------------------------

/// The owner's inbox of join requests across their projects.
pub struct OwnerInbox {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    owner: UserId,
    requests: Vec<JoinRequest>,
    subscription: Option<Subscription>,
}

impl OwnerInbox {
    pub async fn open(
        backend: Arc<dyn Backend>,
        feed: &FeedHandle,
        events: UiEventBus,
        owner: UserId,
    ) -> Result<Self> {
        let scope = Scope::filtered(Table::JoinRequests, "owner", owner.to_string());
        let subscription = feed.subscribe(scope).await?;
        let requests = backend.list_join_requests_for_owner(owner).await?;
        Ok(Self {
            backend,
            events,
            owner,
            requests,
            subscription: Some(subscription),
        })
    }

    pub fn requests(&self) -> &[JoinRequest] {
        &self.requests
    }

    pub fn pending(&self) -> impl Iterator<Item = &JoinRequest> {
        self.requests
            .iter()
            .filter(|r| r.status == RequestStatus::Pending)
    }

    /// Full-refetch reconciliation on any matching event.  Returns `false`
    /// once the inbox is closed or the feed has ended.
    pub async fn pump(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(_) => {
                if let Err(e) = self.refetch().await {
                    warn!(owner = %self.owner, error = %e, "inbox refetch failed");
                    self.events.error("load join requests", &e);
                }
                true
            }
            None => {
                self.subscription = None;
                false
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
    }

    /// `pending -> accepted`; the backend also adds the requester to the
    /// project channel as one logical transaction.
    pub async fn accept(&mut self, request: RequestId) -> Result<JoinRequest> {
        match self.backend.accept_join_request(self.owner, request).await {
            Ok(updated) => {
                self.reconcile(updated.clone());
                self.events.emit(UiEvent::RequestResolved(RequestResolvedPayload {
                    request_id: updated.id,
                    status: updated.status,
                }));
                Ok(updated)
            }
            Err(e) => {
                self.events.error("accept request", &e);
                Err(e.into())
            }
        }
    }

    /// `pending -> rejected`.  No side effect beyond the status.
    pub async fn reject(&mut self, request: RequestId) -> Result<JoinRequest> {
        match self.backend.reject_join_request(self.owner, request).await {
            Ok(updated) => {
                self.reconcile(updated.clone());
                self.events.emit(UiEvent::RequestResolved(RequestResolvedPayload {
                    request_id: updated.id,
                    status: updated.status,
                }));
                Ok(updated)
            }
            Err(e) => {
                self.events.error("reject request", &e);
                Err(e.into())
            }
        }
    }

    async fn refetch(&mut self) -> Result<()> {
        self.requests = self.backend.list_join_requests_for_owner(self.owner).await?;
        Ok(())
    }

    fn reconcile(&mut self, updated: JoinRequest) {
        match self.requests.iter_mut().find(|r| r.id == updated.id) {
            Some(existing) => *existing = updated,
            None => self.requests.push(updated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orunlink_backend::{BackendError, MemoryBackend, NewProject};
    use orunlink_feed::{spawn_feed, FeedConfig};
    use orunlink_shared::models::Profile;

    async fn fixture() -> (Arc<dyn Backend>, FeedHandle, UiEventBus, Profile, Profile, ProjectId) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let feed = spawn_feed(backend.changes(), FeedConfig::default());
        let owner = backend
            .sign_up("iris@example.com", "password", "iris")
            .await
            .unwrap()
            .user;
        let visitor = backend
            .sign_up("jude@example.com", "password", "jude")
            .await
            .unwrap()
            .user;
        let project = backend
            .create_project(NewProject {
                owner: owner.id,
                title: "Zine layout".into(),
                description: String::new(),
                category: None,
                tags: vec![],
                main_image_url: None,
                media_urls: vec![],
            })
            .await
            .unwrap();
        (backend, feed, UiEventBus::new(16), owner, visitor, project.id)
    }

    #[tokio::test]
    async fn requesting_twice_keeps_a_single_pending_row() {
        let (backend, _feed, events, owner, visitor, project) = fixture().await;
        let mut flow = JoinRequestFlow::load(backend.clone(), events, project, visitor.id)
            .await
            .unwrap();

        flow.request_to_join().await.unwrap();
        let first_id = flow.request().unwrap().id;
        // Second press: no-op, still the same row.
        flow.request_to_join().await.unwrap();
        assert_eq!(flow.state(), JoinState::Pending);
        assert_eq!(flow.request().unwrap().id, first_id);

        let listed = backend.list_join_requests_for_owner(owner.id).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn owner_request_is_rejected_and_rolled_back() {
        let (backend, _feed, events, owner, _visitor, project) = fixture().await;
        let mut flow = JoinRequestFlow::load(backend.clone(), events.clone(), project, owner.id)
            .await
            .unwrap();
        let mut listener = events.subscribe();

        let err = flow.request_to_join().await.unwrap_err();
        assert!(matches!(
            err,
            crate::ClientError::Backend(BackendError::Validation(_))
        ));
        assert_eq!(flow.state(), JoinState::NotRequested);
        assert!(matches!(listener.recv().await.unwrap(), UiEvent::Error(_)));
    }

    #[tokio::test]
    async fn inbox_sees_new_requests_through_the_feed() {
        let (backend, feed, events, owner, visitor, project) = fixture().await;
        let mut inbox = OwnerInbox::open(backend.clone(), &feed, events.clone(), owner.id)
            .await
            .unwrap();
        assert_eq!(inbox.pending().count(), 0);

        backend
            .create_join_request(project, visitor.id)
            .await
            .unwrap();
        assert!(inbox.pump().await);
        assert_eq!(inbox.pending().count(), 1);

        let id = inbox.pending().next().unwrap().id;
        let accepted = inbox.accept(id).await.unwrap();
        assert_eq!(accepted.status, RequestStatus::Accepted);
        assert_eq!(inbox.pending().count(), 0);

        // Terminal: a second decision conflicts.
        let err = inbox.reject(id).await.unwrap_err();
        assert!(matches!(
            err,
            crate::ClientError::Backend(BackendError::Conflict(_))
        ));
        inbox.close().await;
    }

    #[tokio::test]
    async fn viewer_flow_reconciles_from_events() {
        let (backend, _feed, events, owner, visitor, project) = fixture().await;
        let mut flow = JoinRequestFlow::load(backend.clone(), events, project, visitor.id)
            .await
            .unwrap();
        flow.request_to_join().await.unwrap();

        let accepted = backend
            .accept_join_request(owner.id, flow.request().unwrap().id)
            .await
            .unwrap();
        let event = ChangeEvent {
            table: Table::JoinRequests,
            op: orunlink_shared::protocol::ChangeOp::Update,
            row: serde_json::to_value(&accepted).unwrap(),
            committed_at: chrono::Utc::now(),
        };
        flow.apply_event(&event);
        assert_eq!(flow.state(), JoinState::Accepted);
    }
}
