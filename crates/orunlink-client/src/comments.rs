//! Comment thread screen.
//!
//! Reconciliation here is the full-refetch strategy: ordering and author
//! joins make incremental patching not worth it, so any matching change
//! event re-runs the same list query that populated the screen.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use orunlink_backend::{Backend, CommentOrder};
use orunlink_feed::{FeedHandle, Subscription};
use orunlink_shared::models::{Comment, Profile};
use orunlink_shared::protocol::{Scope, Table};
use orunlink_shared::types::{CommentId, ProjectId, UserId};

use crate::error::Result;
use crate::events::UiEventBus;
use crate::optimistic;

/// A comment joined with its author's profile.
#[derive(Debug, Clone)]
pub struct CommentView {
    pub comment: Comment,
    pub author: Profile,
}

pub struct CommentsScreen {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    project: ProjectId,
    viewer: UserId,
    order: CommentOrder,
    comments: Vec<CommentView>,
    profiles: HashMap<UserId, Profile>,
    subscription: Option<Subscription>,
}

impl CommentsScreen {
    pub async fn open(
        backend: Arc<dyn Backend>,
        feed: &FeedHandle,
        events: UiEventBus,
        project: ProjectId,
        viewer: UserId,
        order: CommentOrder,
    ) -> Result<Self> {
        let scope = Scope::filtered(Table::Comments, "project", project.to_string());
        let subscription = feed.subscribe(scope).await?;

        let mut screen = Self {
            backend,
            events,
            project,
            viewer,
            order,
            comments: Vec::new(),
            profiles: HashMap::new(),
            subscription: Some(subscription),
        };
        screen.refetch().await?;
        Ok(screen)
    }

    pub fn comments(&self) -> &[CommentView] {
        &self.comments
    }

    /// Wait for the next matching change event and refetch the thread.
    /// Returns `false` once the screen is closed or the feed has ended.
    pub async fn pump(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(_) => {
                if let Err(e) = self.refetch().await {
                    warn!(project = %self.project, error = %e, "comment refetch failed");
                    self.events.error("load comments", &e);
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

    /// Post a comment.  The thread updates before the call resolves; on
    /// rejection the optimistic entry is rolled back and the error
    /// surfaced.
    pub async fn add(&mut self, content: &str) -> Result<()> {
        let author = self.resolve_profile(self.viewer).await;
        let temp_id = CommentId::new();

        let mut next = self.comments.clone();
        let placeholder = CommentView {
            comment: Comment {
                id: temp_id,
                project: self.project,
                author: self.viewer,
                content: content.to_string(),
                like_count: 0,
                created_at: Utc::now(),
            },
            author,
        };
        match self.order {
            CommentOrder::NewestFirst => next.insert(0, placeholder),
            CommentOrder::OldestFirst => next.push(placeholder),
        }

        let result = optimistic::apply(
            &mut self.comments,
            next,
            self.backend.add_comment(self.project, self.viewer, content),
        )
        .await;

        match result {
            Ok(stored) => {
                if let Some(view) = self.comments.iter_mut().find(|v| v.comment.id == temp_id) {
                    view.comment = stored;
                }
                Ok(())
            }
            Err(e) => {
                self.events.error("post comment", &e);
                Err(e)
            }
        }
    }

    /// Re-run the query that populated the screen.  Idempotent: applying
    /// it twice in a row renders the same thread.
    async fn refetch(&mut self) -> Result<()> {
        let rows = self.backend.list_comments(self.project, self.order).await?;
        let mut views = Vec::with_capacity(rows.len());
        for row in rows {
            let author = self.resolve_profile(row.author).await;
            views.push(CommentView {
                comment: row,
                author,
            });
        }
        self.comments = views;
        Ok(())
    }

    async fn resolve_profile(&mut self, user: UserId) -> Profile {
        if let Some(profile) = self.profiles.get(&user) {
            return profile.clone();
        }
        match self.backend.get_profile(user).await {
            Ok(profile) => {
                self.profiles.insert(user, profile.clone());
                profile
            }
            Err(e) => {
                warn!(user = %user, error = %e, "author profile lookup failed, using placeholder");
                crate::chat::placeholder_profile(user)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orunlink_backend::{MemoryBackend, NewProject};
    use orunlink_feed::{spawn_feed, FeedConfig};

    async fn fixture() -> (Arc<dyn Backend>, FeedHandle, UiEventBus, Profile, ProjectId) {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let feed = spawn_feed(backend.changes(), FeedConfig::default());
        let owner = backend
            .sign_up("gus@example.com", "password", "gus")
            .await
            .unwrap()
            .user;
        let project = backend
            .create_project(NewProject {
                owner: owner.id,
                title: "Field recordings".into(),
                description: String::new(),
                category: None,
                tags: vec![],
                main_image_url: None,
                media_urls: vec![],
            })
            .await
            .unwrap();
        (backend, feed, UiEventBus::new(16), owner, project.id)
    }

    #[tokio::test]
    async fn another_users_comment_arrives_via_refetch() {
        let (backend, feed, events, owner, project) = fixture().await;
        let other = backend
            .sign_up("hana@example.com", "password", "hana")
            .await
            .unwrap()
            .user;

        let mut screen = CommentsScreen::open(
            backend.clone(),
            &feed,
            events,
            project,
            owner.id,
            CommentOrder::OldestFirst,
        )
        .await
        .unwrap();
        assert!(screen.comments().is_empty());

        backend
            .add_comment(project, other.id, "lovely textures")
            .await
            .unwrap();
        assert!(screen.pump().await);

        assert_eq!(screen.comments().len(), 1);
        assert_eq!(screen.comments()[0].author.username, "hana");
        screen.close().await;
    }

    #[tokio::test]
    async fn rejected_comment_rolls_back() {
        let (backend, feed, events, owner, project) = fixture().await;
        let mut screen = CommentsScreen::open(
            backend.clone(),
            &feed,
            events.clone(),
            project,
            owner.id,
            CommentOrder::NewestFirst,
        )
        .await
        .unwrap();

        // Empty content fails validation on the backend.
        let err = screen.add("   ").await.unwrap_err();
        assert!(matches!(err, crate::ClientError::Backend(_)));
        assert!(screen.comments().is_empty());
    }

    #[tokio::test]
    async fn own_comment_is_visible_before_the_event_lands() {
        let (backend, feed, events, owner, project) = fixture().await;
        let mut screen = CommentsScreen::open(
            backend.clone(),
            &feed,
            events,
            project,
            owner.id,
            CommentOrder::NewestFirst,
        )
        .await
        .unwrap();

        screen.add("first!").await.unwrap();
        assert_eq!(screen.comments().len(), 1);
        assert_eq!(screen.comments()[0].comment.content, "first!");

        // The follow-up refetch converges to the same thread.
        assert!(screen.pump().await);
        assert_eq!(screen.comments().len(), 1);
        screen.close().await;
    }
}
