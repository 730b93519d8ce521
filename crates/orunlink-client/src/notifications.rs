//! Notification list with unread badge.
//!
//! Full-refetch reconciliation: the list is small and ordered newest first,
//! so any matching change event re-runs the list query.

use std::sync::Arc;

use tracing::warn;

use orunlink_backend::Backend;
use orunlink_feed::{FeedHandle, Subscription};
use orunlink_shared::models::Notification;
use orunlink_shared::protocol::{Scope, Table};
use orunlink_shared::types::{NotificationId, UserId};

use crate::error::Result;
use crate::events::UiEventBus;
use crate::optimistic;

pub struct NotificationsScreen {
    backend: Arc<dyn Backend>,
    events: UiEventBus,
    user: UserId,
    items: Vec<Notification>,
    subscription: Option<Subscription>,
}

impl NotificationsScreen {
    pub async fn open(
        backend: Arc<dyn Backend>,
        feed: &FeedHandle,
        events: UiEventBus,
        user: UserId,
    ) -> Result<Self> {
        let scope = Scope::filtered(Table::Notifications, "recipient", user.to_string());
        let subscription = feed.subscribe(scope).await?;
        let items = backend.list_notifications(user).await?;
        Ok(Self {
            backend,
            events,
            user,
            items,
            subscription: Some(subscription),
        })
    }

    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    /// Wait for the next matching change event and refetch.  Returns
    /// `false` once the screen is closed or the feed has ended.
    pub async fn pump(&mut self) -> bool {
        let Some(subscription) = self.subscription.as_mut() else {
            return false;
        };
        match subscription.recv().await {
            Some(_) => {
                if let Err(e) = self.refetch().await {
                    warn!(user = %self.user, error = %e, "notification refetch failed");
                    self.events.error("load notifications", &e);
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

    /// Mark one notification read.  The badge updates before the call
    /// resolves; a rejection restores it and surfaces the error.
    pub async fn mark_read(&mut self, id: NotificationId) -> Result<()> {
        let mut next = self.items.clone();
        match next.iter_mut().find(|n| n.id == id) {
            Some(item) => item.read = true,
            None => return Ok(()),
        }

        let result = optimistic::apply(
            &mut self.items,
            next,
            self.backend.mark_notification_read(id),
        )
        .await;

        if let Err(e) = result {
            self.events.error("mark notification read", &e);
            return Err(e);
        }
        Ok(())
    }

    async fn refetch(&mut self) -> Result<()> {
        self.items = self.backend.list_notifications(self.user).await?;
        Ok(())
    }
}
