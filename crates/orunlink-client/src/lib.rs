//! # orunlink-client
//!
//! Screen-level state for the Orunlink application: the session store, the
//! per-feature screens (chat, comments, join requests, toggles,
//! notifications), the uniform optimistic-update capability, and the UI
//! event bus the embedding shell listens on.
//!
//! Everything here composes the [`orunlink_backend::Backend`] facade with
//! the [`orunlink_feed`] subscription manager; no screen talks to the
//! backend through any other path.

pub mod cache;
pub mod chat;
pub mod comments;
pub mod config;
pub mod events;
pub mod notifications;
pub mod optimistic;
pub mod requests;
pub mod session;
pub mod toggles;

mod error;

pub use error::ClientError;

use tracing_subscriber::{fmt, EnvFilter};

/// Initialise logging for the client process.
///
/// `RUST_LOG` overrides the default per-crate levels.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("orunlink_client=debug,orunlink_backend=debug,orunlink_feed=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

#[cfg(test)]
mod tests {
    //! End-to-end flow over the in-memory backend and a live feed.

    use std::sync::Arc;

    use orunlink_backend::{Backend, MemoryBackend, NewProject};
    use orunlink_feed::{spawn_feed, FeedConfig};
    use orunlink_shared::types::Conversation;

    use crate::chat::ChatScreen;
    use crate::events::UiEventBus;
    use crate::requests::{JoinRequestFlow, JoinState};

    #[tokio::test]
    async fn join_accept_and_chat_without_manual_refresh() {
        let backend: Arc<dyn Backend> = Arc::new(MemoryBackend::new());
        let feed = spawn_feed(backend.changes(), FeedConfig::default());
        let events = UiEventBus::new(16);

        let alice = backend
            .sign_up("alice@example.com", "password-a", "alice")
            .await
            .unwrap()
            .user;
        let bob = backend
            .sign_up("bob@example.com", "password-b", "bob")
            .await
            .unwrap()
            .user;
        let project = backend
            .create_project(NewProject {
                owner: bob.id,
                title: "Harbor timelapse".into(),
                description: "Joint edit".into(),
                category: None,
                tags: vec![],
                main_image_url: None,
                media_urls: vec![],
            })
            .await
            .unwrap();

        // Alice requests to join: none -> pending.
        let mut flow =
            JoinRequestFlow::load(backend.clone(), events.clone(), project.id, alice.id)
                .await
                .unwrap();
        assert_eq!(flow.state(), JoinState::NotRequested);
        flow.request_to_join().await.unwrap();
        assert_eq!(flow.state(), JoinState::Pending);
        let request = flow.request().unwrap().clone();

        // Bob accepts: pending -> accepted, Alice becomes a participant.
        backend
            .accept_join_request(bob.id, request.id)
            .await
            .unwrap();
        flow.refresh().await.unwrap();
        assert_eq!(flow.state(), JoinState::Accepted);

        // Bob's chat screen is already open; Alice sends a message and it
        // arrives through the realtime feed, no manual refresh involved.
        let channel = Conversation::Project(project.id);
        let mut bob_screen = ChatScreen::open(
            backend.clone(),
            &feed,
            events.clone(),
            channel,
            bob.id,
        )
        .await
        .unwrap();
        let mut alice_screen = ChatScreen::open(
            backend.clone(),
            &feed,
            events.clone(),
            channel,
            alice.id,
        )
        .await
        .unwrap();

        alice_screen.send("got the footage, uploading tonight").await.unwrap();

        assert!(bob_screen.pump().await);
        let messages = bob_screen.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "got the footage, uploading tonight");
        assert_eq!(messages[0].sender.username, "alice");

        bob_screen.close().await;
        alice_screen.close().await;
    }
}
