//! Presence-toggle controls: like, save, follow.
//!
//! A toggle's truth is row presence on the backend, so the control's state
//! is `(present, count)` and flipping it is check-then-insert-or-delete on
//! the backend side.  The final presence equals the parity of the number of
//! successful toggle calls, however they interleave with failed ones.

use std::sync::Arc;

use tracing::warn;

use orunlink_backend::Backend;
use orunlink_shared::protocol::{ChangeEvent, Table};
use orunlink_shared::types::{ToggleKind, ToggleTarget, UserId};

use crate::error::Result;
use crate::events::{ToggleFailedPayload, UiEvent, UiEventBus};
use crate::optimistic;

/// The optimistically-managed part of the control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ToggleState {
    present: bool,
    count: u64,
}

/// One like/save/follow button.
pub struct ToggleControl {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    kind: ToggleKind,
    user: UserId,
    target: ToggleTarget,
    state: ToggleState,
}

impl ToggleControl {
    pub async fn load(
        backend: Arc<dyn Backend>,
        events: UiEventBus,
        kind: ToggleKind,
        user: UserId,
        target: ToggleTarget,
    ) -> Result<Self> {
        let present = backend.is_set(kind, user, target).await?;
        let count = backend.count(kind, target).await?;
        Ok(Self {
            backend,
            events,
            kind,
            user,
            target,
            state: ToggleState { present, count },
        })
    }

    pub fn is_set(&self) -> bool {
        self.state.present
    }

    pub fn count(&self) -> u64 {
        self.state.count
    }

    /// Flip the toggle.  The indicator and count update before the call
    /// resolves; a rejection restores both and surfaces the error.
    pub async fn toggle(&mut self) -> Result<bool> {
        let next = ToggleState {
            present: !self.state.present,
            count: if self.state.present {
                self.state.count.saturating_sub(1)
            } else {
                self.state.count + 1
            },
        };

        let result = optimistic::apply(
            &mut self.state,
            next,
            self.backend.toggle(self.kind, self.user, self.target),
        )
        .await;

        match result {
            Ok(present) => {
                // The backend's answer wins over the optimistic guess
                // (a concurrent toggle elsewhere may have raced us).
                self.state.present = present;
                Ok(present)
            }
            Err(e) => {
                self.events.emit(UiEvent::ToggleFailed(ToggleFailedPayload {
                    kind: self.kind,
                    message: e.to_string(),
                }));
                Err(e)
            }
        }
    }

    /// Does this change event concern this control's target?
    pub fn matches_event(&self, event: &ChangeEvent) -> bool {
        let table = match self.kind {
            ToggleKind::Like => Table::Likes,
            ToggleKind::Save => Table::Saves,
            ToggleKind::Follow => Table::Follows,
        };
        event.table == table
            && event.row.get("target")
                == Some(&serde_json::Value::String(self.target.id().to_string()))
    }

    /// Reconcile after a matching change event.  Counts cannot be patched
    /// from a single event idempotently (our own echo would double-count),
    /// so reconciliation refetches both values.
    pub async fn refresh(&mut self) -> Result<()> {
        match self.backend.is_set(self.kind, self.user, self.target).await {
            Ok(present) => self.state.present = present,
            Err(e) => {
                warn!(error = %e, "toggle refresh failed");
                return Err(e.into());
            }
        }
        self.state.count = self.backend.count(self.kind, self.target).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orunlink_backend::{BackendError, MemoryBackend, NewProject};
    use orunlink_shared::protocol::ChangeOp;
    use orunlink_shared::types::ProjectId;

    async fn fixture() -> (Arc<dyn Backend>, UiEventBus, UserId, ToggleTarget) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let user = backend
            .sign_up("kira@example.com", "password", "kira")
            .await
            .unwrap()
            .user;
        let owner = backend
            .sign_up("liam@example.com", "password", "liam")
            .await
            .unwrap()
            .user;
        let project = backend
            .create_project(NewProject {
                owner: owner.id,
                title: "Risograph prints".into(),
                description: String::new(),
                category: None,
                tags: vec![],
                main_image_url: None,
                media_urls: vec![],
            })
            .await
            .unwrap();
        (
            backend,
            UiEventBus::new(16),
            user.id,
            ToggleTarget::Project(project.id),
        )
    }

    #[tokio::test]
    async fn presence_follows_toggle_parity() {
        let (backend, events, user, target) = fixture().await;
        let mut control =
            ToggleControl::load(backend, events, ToggleKind::Like, user, target)
                .await
                .unwrap();

        for round in 1..=4u64 {
            control.toggle().await.unwrap();
            let expected = round % 2 == 1;
            assert_eq!(control.is_set(), expected);
            assert_eq!(control.count(), u64::from(expected));
        }
    }

    #[tokio::test]
    async fn rejected_save_toggle_rolls_back_and_reports() {
        let (backend, events, user, _target) = fixture().await;
        let mut listener = events.subscribe();

        // A save against a project that no longer exists fails backend-side.
        let gone = ToggleTarget::Project(ProjectId::new());
        let mut control =
            ToggleControl::load(backend, events.clone(), ToggleKind::Save, user, gone)
                .await
                .unwrap();
        assert!(!control.is_set());

        let err = control.toggle().await.unwrap_err();
        assert!(matches!(
            err,
            crate::ClientError::Backend(BackendError::NotFound)
        ));
        // The saved indicator is back at its pre-toggle value and the user
        // saw an error.
        assert!(!control.is_set());
        assert_eq!(control.count(), 0);
        assert!(matches!(
            listener.recv().await.unwrap(),
            UiEvent::ToggleFailed(_)
        ));
    }

    #[tokio::test]
    async fn refresh_reconciles_with_other_users() {
        let (backend, events, user, target) = fixture().await;
        let other = backend
            .sign_up("mona@example.com", "password", "mona")
            .await
            .unwrap()
            .user;
        let mut control = ToggleControl::load(
            backend.clone(),
            events,
            ToggleKind::Like,
            user,
            target,
        )
        .await
        .unwrap();

        control.toggle().await.unwrap();
        backend
            .toggle(ToggleKind::Like, other.id, target)
            .await
            .unwrap();

        control.refresh().await.unwrap();
        assert!(control.is_set());
        assert_eq!(control.count(), 2);
    }

    #[tokio::test]
    async fn event_matching_is_scoped_to_the_target() {
        let (backend, events, user, target) = fixture().await;
        let control = ToggleControl::load(backend, events, ToggleKind::Like, user, target)
            .await
            .unwrap();

        let matching = ChangeEvent {
            table: Table::Likes,
            op: ChangeOp::Insert,
            row: serde_json::json!({ "user": user, "target": target.id() }),
            committed_at: chrono::Utc::now(),
        };
        assert!(control.matches_event(&matching));

        let other_target = ChangeEvent {
            table: Table::Likes,
            op: ChangeOp::Insert,
            row: serde_json::json!({ "user": user, "target": uuid::Uuid::new_v4() }),
            committed_at: chrono::Utc::now(),
        };
        assert!(!control.matches_event(&other_target));

        let other_table = ChangeEvent {
            table: Table::Saves,
            op: ChangeOp::Insert,
            row: serde_json::json!({ "user": user, "target": target.id() }),
            committed_at: chrono::Utc::now(),
        };
        assert!(!control.matches_event(&other_table));
    }
}
