use serde::Serialize;
use tokio::sync::broadcast;

use orunlink_shared::types::{Conversation, MessageId, RequestId, RequestStatus, ToggleKind, UserId};

#[derive(Debug, Clone, Serialize)]
pub struct NewMessagePayload {
    pub conversation: String,
    pub message_id: MessageId,
    pub sender: UserId,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestResolvedPayload {
    pub request_id: RequestId,
    pub status: RequestStatus,
}

/// A transient, user-visible failure notice (toast).
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    /// What the user was doing, e.g. `"send message"`.
    pub context: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToggleFailedPayload {
    pub kind: ToggleKind,
    pub message: String,
}

/// Events the embedding UI shell renders (toasts, badges, scroll-to-new).
#[derive(Debug, Clone, Serialize)]
pub enum UiEvent {
    NewMessage(NewMessagePayload),
    RequestResolved(RequestResolvedPayload),
    ToggleFailed(ToggleFailedPayload),
    Error(ErrorPayload),
}

/// Broadcast bus from screens to the UI shell.
#[derive(Clone)]
pub struct UiEventBus {
    tx: broadcast::Sender<UiEvent>,
}

impl UiEventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.tx.subscribe()
    }

    /// Emission never fails the caller; a missing listener just logs.
    pub fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("no UI listeners for event");
        }
    }

    /// Shorthand for the toast-style failure notice.
    pub fn error(&self, context: &str, message: impl std::fmt::Display) {
        self.emit(UiEvent::Error(ErrorPayload {
            context: context.to_string(),
            message: message.to_string(),
        }));
    }
}

impl UiEvent {
    /// Helper for [`Conversation`]-keyed message events.
    pub fn new_message(
        conversation: Conversation,
        message_id: MessageId,
        sender: UserId,
        created_at: String,
    ) -> Self {
        Self::NewMessage(NewMessagePayload {
            conversation: conversation.key(),
            message_id,
            sender,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitted_events_reach_subscribers() {
        let bus = UiEventBus::new(4);
        let mut rx = bus.subscribe();

        bus.error("load comments", "backend request failed");

        match rx.recv().await.unwrap() {
            UiEvent::Error(payload) => {
                assert_eq!(payload.context, "load comments");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emitting_without_listeners_is_fine() {
        let bus = UiEventBus::new(4);
        bus.error("noop", "nobody is listening");
    }
}
