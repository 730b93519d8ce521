//! Live chat screen: initial fetch plus incremental merge of realtime
//! events.
//!
//! Incoming rows are joined with sender profiles through a per-screen
//! profile cache (one backend lookup per unique sender), deduplicated by
//! message id, and kept sorted by creation timestamp.  Arrival order is not
//! trusted: under concurrent senders events can arrive out of creation
//! order, and the rendered list must not.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use orunlink_backend::{Backend, Page};
use orunlink_feed::{FeedHandle, Subscription};
use orunlink_shared::models::{ChatMessage, GroupChatSettings, Profile};
use orunlink_shared::protocol::{ChangeEvent, ChangeOp, Scope, Table};
use orunlink_shared::types::{Conversation, MessageId, UserId};

use crate::error::Result;
use crate::events::{UiEvent, UiEventBus};
use crate::optimistic;

/// A message joined with its sender's profile, ready to render.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: MessageId,
    pub sender: Profile,
    pub content: String,
    pub created_at: DateTime<Utc>,
    /// True while an optimistic send awaits backend confirmation.
    pub pending: bool,
}

pub struct ChatScreen {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    conversation: Conversation,
    viewer: UserId,
    messages: Vec<MessageView>,
    /// Per-screen profile cache; only successful lookups are stored so a
    /// failed sender resolves again on their next message.
    profiles: HashMap<UserId, Profile>,
    subscription: Option<Subscription>,
}

impl ChatScreen {
    /// Mount the screen: subscribe to the conversation's scope first, then
    /// run the initial fetch, so no message can fall between the two.
    pub async fn open(
        backend: Arc<dyn Backend>,
        feed: &FeedHandle,
        events: UiEventBus,
        conversation: Conversation,
        viewer: UserId,
    ) -> Result<Self> {
        let scope = Scope::filtered(Table::ChatMessages, "conversation", conversation.key());
        let subscription = feed.subscribe(scope).await?;

        let mut screen = Self {
            backend,
            events,
            conversation,
            viewer,
            messages: Vec::new(),
            profiles: HashMap::new(),
            subscription: Some(subscription),
        };

        let rows = screen
            .backend
            .list_messages(conversation, Page::default())
            .await?;
        for row in rows {
            screen.insert_row(row).await;
        }
        Ok(screen)
    }

    /// The rendered message list, oldest first.
    pub fn messages(&self) -> &[MessageView] {
        &self.messages
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation
    }

    /// Wait for the next realtime event and merge it.  Returns `false`
    /// once the screen is closed or the feed has ended; the caller's pump
    /// loop exits on that.
    pub async fn pump(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(event) => {
                self.merge(event).await;
                true
            }
            None => {
                self.subscription = None;
                false
            }
        }
    }

    /// Unmount: tear down exactly this screen's subscription.
    pub async fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe().await;
        }
    }

    /// Send a message.  The view updates before the call resolves; on
    /// rejection the optimistic entry is rolled back and the error
    /// surfaced.
    pub async fn send(&mut self, content: &str) -> Result<()> {
        let temp_id = MessageId::new();
        let sender = self.resolve_profile(self.viewer).await;

        let mut next = self.messages.clone();
        next.push(MessageView {
            id: temp_id,
            sender: sender.clone(),
            content: content.to_string(),
            created_at: Utc::now(),
            pending: true,
        });

        let stored = match optimistic::apply(
            &mut self.messages,
            next,
            self.backend
                .send_message(self.conversation, self.viewer, content),
        )
        .await
        {
            Ok(stored) => stored,
            Err(e) => {
                self.events.error("send message", &e);
                return Err(e);
            }
        };

        // Swap the placeholder for the stored row; the realtime echo of the
        // same id then merges as a no-op.
        self.messages.retain(|m| m.id != temp_id);
        self.insert_view(MessageView {
            id: stored.id,
            sender,
            content: stored.content,
            created_at: stored.created_at,
            pending: false,
        });
        Ok(())
    }

    /// Advance the viewer's last-read marker (group channels only).
    pub async fn mark_read(&self) -> Result<()> {
        if let Conversation::Project(project) = self.conversation {
            self.backend.mark_read(project, self.viewer).await?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Group settings passthrough
    // ------------------------------------------------------------------

    pub async fn group_settings(&self) -> Result<Option<GroupChatSettings>> {
        match self.conversation {
            Conversation::Project(project) => {
                Ok(Some(self.backend.get_group_settings(project).await?))
            }
            Conversation::Direct { .. } => Ok(None),
        }
    }

    pub async fn update_group_settings(
        &self,
        settings: GroupChatSettings,
    ) -> Result<GroupChatSettings> {
        Ok(self
            .backend
            .update_group_settings(self.viewer, settings)
            .await?)
    }

    // ------------------------------------------------------------------
    // Merge
    // ------------------------------------------------------------------

    async fn merge(&mut self, event: ChangeEvent) {
        if event.op != ChangeOp::Insert {
            // Messages are append-only; anything else is noise.
            debug!(op = ?event.op, "ignoring non-insert chat event");
            return;
        }
        let row: ChatMessage = match event.decode() {
            Ok(row) => row,
            Err(e) => {
                warn!(error = %e, "dropping undecodable chat event");
                return;
            }
        };
        let id = row.id;
        let sender = row.sender;
        let created_at = row.created_at;
        if self.insert_row(row).await {
            self.events.emit(UiEvent::new_message(
                self.conversation,
                id,
                sender,
                created_at.to_rfc3339(),
            ));
        }
    }

    /// Join a raw row with its sender profile and place it in the list.
    /// Re-applying a row that is already present is a no-op; returns
    /// whether the row was newly inserted.
    async fn insert_row(&mut self, row: ChatMessage) -> bool {
        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == row.id) {
            existing.pending = false;
            return false;
        }
        let sender = self.resolve_profile(row.sender).await;
        let view = MessageView {
            id: row.id,
            sender,
            content: row.content,
            created_at: row.created_at,
            pending: false,
        };
        self.insert_view(view);
        true
    }

    /// Sorted insert by (created_at, id); event-arrival order is not the
    /// render order.
    fn insert_view(&mut self, view: MessageView) {
        let position = self
            .messages
            .partition_point(|m| (m.created_at, m.id) <= (view.created_at, view.id));
        self.messages.insert(position, view);
    }

    /// Profile from the screen cache or the backend.  A failed lookup
    /// degrades to a placeholder so the message is never dropped.
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
                warn!(user = %user, error = %e, "sender profile lookup failed, using placeholder");
                placeholder_profile(user)
            }
        }
    }
}

pub(crate) fn placeholder_profile(user: UserId) -> Profile {
    let short = user.to_string().chars().take(8).collect::<String>();
    let now = Utc::now();
    Profile {
        id: user,
        username: format!("user:{short}"),
        display_name: None,
        bio: None,
        avatar_url: None,
        created_at: now,
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use orunlink_backend::{BackendError, MemoryBackend, NewProject};
    use orunlink_feed::{spawn_feed, FeedConfig};
    use tokio::sync::mpsc;

    struct Fixture {
        backend: Arc<dyn Backend>,
        events: UiEventBus,
        source_tx: mpsc::Sender<ChangeEvent>,
        feed: FeedHandle,
        owner: Profile,
        project: orunlink_shared::models::Project,
    }

    /// Backend for fetches and profile joins; a hand-driven source for the
    /// feed, so tests control event arrival order exactly.
    async fn fixture() -> Fixture {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let (source_tx, rx) = mpsc::channel::<ChangeEvent>(64);
        let source = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        let feed = spawn_feed(source, FeedConfig::default());

        let owner = backend
            .sign_up("owner@example.com", "password", "owner")
            .await
            .unwrap()
            .user;
        let project = backend
            .create_project(NewProject {
                owner: owner.id,
                title: "Stop-motion reel".into(),
                description: String::new(),
                category: None,
                tags: vec![],
                main_image_url: None,
                media_urls: vec![],
            })
            .await
            .unwrap();

        Fixture {
            backend,
            events: UiEventBus::new(16),
            source_tx,
            feed,
            owner,
            project,
        }
    }

    fn message_event(
        conversation: Conversation,
        sender: UserId,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> ChangeEvent {
        let row = ChatMessage {
            id: MessageId::new(),
            conversation: conversation.key(),
            project: None,
            sender,
            recipient: None,
            content: content.to_string(),
            created_at,
        };
        ChangeEvent {
            table: Table::ChatMessages,
            op: ChangeOp::Insert,
            row: serde_json::to_value(&row).unwrap(),
            committed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn out_of_order_events_render_in_creation_order() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &fx.feed,
            fx.events.clone(),
            channel,
            fx.owner.id,
        )
        .await
        .unwrap();

        let base = Utc::now();
        // Arrival order c, a, b; creation order a, b, c.
        for (content, offset) in [("msg_c", 3), ("msg_a", 1), ("msg_b", 2)] {
            fx.source_tx
                .send(message_event(
                    channel,
                    fx.owner.id,
                    content,
                    base + Duration::seconds(offset),
                ))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            assert!(screen.pump().await);
        }

        let rendered: Vec<&str> = screen.messages().iter().map(|m| m.content.as_str()).collect();
        assert_eq!(rendered, vec!["msg_a", "msg_b", "msg_c"]);
    }

    #[tokio::test]
    async fn reapplying_the_same_row_is_a_no_op() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &fx.feed,
            fx.events.clone(),
            channel,
            fx.owner.id,
        )
        .await
        .unwrap();

        let event = message_event(channel, fx.owner.id, "once", Utc::now());
        fx.source_tx.send(event.clone()).await.unwrap();
        fx.source_tx.send(event).await.unwrap();
        assert!(screen.pump().await);
        assert!(screen.pump().await);

        assert_eq!(screen.messages().len(), 1);
    }

    #[tokio::test]
    async fn unknown_sender_degrades_to_placeholder() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &fx.feed,
            fx.events.clone(),
            channel,
            fx.owner.id,
        )
        .await
        .unwrap();

        let ghost = UserId::new();
        fx.source_tx
            .send(message_event(channel, ghost, "who dis", Utc::now()))
            .await
            .unwrap();
        assert!(screen.pump().await);

        // The message is kept, not dropped.
        assert_eq!(screen.messages().len(), 1);
        assert!(screen.messages()[0].sender.username.starts_with("user:"));
    }

    #[tokio::test]
    async fn closed_screen_ignores_later_events() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &fx.feed,
            fx.events.clone(),
            channel,
            fx.owner.id,
        )
        .await
        .unwrap();

        screen.close().await;
        fx.source_tx
            .send(message_event(channel, fx.owner.id, "late", Utc::now()))
            .await
            .unwrap();

        assert!(!screen.pump().await);
        assert!(screen.messages().is_empty());
    }

    #[tokio::test]
    async fn rejected_send_rolls_back_and_surfaces_the_error() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        let outsider = fx
            .backend
            .sign_up("mallory@example.com", "password", "mallory")
            .await
            .unwrap()
            .user;
        let mut listener = fx.events.subscribe();

        // Not a participant, so the backend rejects the send.
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &fx.feed,
            fx.events.clone(),
            channel,
            outsider.id,
        )
        .await
        .unwrap();

        let err = screen.send("let me in").await.unwrap_err();
        assert!(matches!(
            err,
            crate::ClientError::Backend(BackendError::Forbidden)
        ));
        // The optimistic entry was rolled back and a toast was emitted.
        assert!(screen.messages().is_empty());
        assert!(matches!(
            listener.recv().await.unwrap(),
            crate::events::UiEvent::Error(_)
        ));
    }

    #[tokio::test]
    async fn send_appears_immediately_and_reconciles_with_the_echo() {
        let fx = fixture().await;
        let channel = Conversation::Project(fx.project.id);
        // Real feed wired to the backend for this one: the echo path.
        let feed = spawn_feed(fx.backend.changes(), FeedConfig::default());
        let mut screen = ChatScreen::open(
            fx.backend.clone(),
            &feed,
            fx.events.clone(),
            channel,
            fx.owner.id,
        )
        .await
        .unwrap();

        screen.send("first").await.unwrap();
        assert_eq!(screen.messages().len(), 1);
        assert!(!screen.messages()[0].pending);

        // The realtime echo of our own insert merges as a no-op.
        assert!(screen.pump().await);
        assert_eq!(screen.messages().len(), 1);

        screen.close().await;
    }
}
