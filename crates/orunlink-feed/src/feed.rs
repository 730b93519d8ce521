//! Routing task with tokio mpsc command/reply pattern.
//!
//! The routing loop runs in a dedicated tokio task.  External code talks to
//! it through a typed command channel; each subscription gets its own
//! bounded delivery channel, so one slow consumer can delay its own events
//! but never another subscription's.
//!
//! Per-subscription lifecycle:
//! `Unsubscribed -> Subscribing -> Active -> (event)* -> Active ->
//! Unsubscribing -> Unsubscribed`.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use orunlink_shared::constants::SUBSCRIPTION_BUFFER;
use orunlink_shared::protocol::{ChangeEvent, Scope};

use crate::error::{FeedError, Result};

// ---------------------------------------------------------------------------
// Command type
// ---------------------------------------------------------------------------

/// Commands sent *into* the routing task.
enum FeedCommand {
    /// Register a new subscription and reply with its id and receiver.
    Subscribe {
        scope: Scope,
        reply: oneshot::Sender<(u64, mpsc::Receiver<ChangeEvent>)>,
    },
    /// Remove exactly one registration.
    Unsubscribe(u64),
    /// Gracefully stop routing; all subscription channels close.
    Shutdown,
}

/// Configuration for spawning the feed.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Capacity of each subscription's delivery buffer.
    pub subscription_buffer: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            subscription_buffer: SUBSCRIPTION_BUFFER,
        }
    }
}

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// Cloneable handle to a running feed task.
#[derive(Clone)]
pub struct FeedHandle {
    cmd_tx: mpsc::Sender<FeedCommand>,
}

impl FeedHandle {
    /// Open a subscription for `scope`.  The returned [`Subscription`]
    /// receives exactly the events the scope matches, in arrival order.
    pub async fn subscribe(&self, scope: Scope) -> Result<Subscription> {
        let (reply, confirm) = oneshot::channel();
        self.cmd_tx
            .send(FeedCommand::Subscribe {
                scope: scope.clone(),
                reply,
            })
            .await
            .map_err(|_| FeedError::Closed)?;
        let (id, events) = confirm.await.map_err(|_| FeedError::Closed)?;
        debug!(id, table = %scope.table, "subscription active");
        Ok(Subscription {
            id,
            scope,
            events,
            cmd_tx: self.cmd_tx.clone(),
            active: true,
        })
    }

    /// Stop the routing task.  Every open subscription's channel closes.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(FeedCommand::Shutdown).await;
    }
}

/// A live scoped subscription.
pub struct Subscription {
    id: u64,
    scope: Scope,
    events: mpsc::Receiver<ChangeEvent>,
    cmd_tx: mpsc::Sender<FeedCommand>,
    active: bool,
}

impl Subscription {
    /// Next matching event; `None` once the subscription is torn down or
    /// the feed itself has closed.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Tear down this subscription only.  Events already buffered are
    /// discarded; other subscriptions (including ones watching the same
    /// scope) are unaffected.
    pub async fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        self.events.close();
        if self
            .cmd_tx
            .send(FeedCommand::Unsubscribe(self.id))
            .await
            .is_err()
        {
            debug!(id = self.id, "feed already gone on unsubscribe");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if self.active {
            // Best effort; the routing loop also deregisters closed
            // channels on the next delivery attempt.
            let _ = self.cmd_tx.try_send(FeedCommand::Unsubscribe(self.id));
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning / routing
// ---------------------------------------------------------------------------

/// Spawn the routing task over a change-event source.
///
/// The source is typically `backend.changes()`; any stream of
/// [`ChangeEvent`]s works, which is what the tests use.
pub fn spawn_feed<S>(source: S, config: FeedConfig) -> FeedHandle
where
    S: Stream<Item = ChangeEvent> + Send + 'static,
{
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    tokio::spawn(feed_loop(source, cmd_rx, config));
    FeedHandle { cmd_tx }
}

struct Registration {
    id: u64,
    scope: Scope,
    tx: mpsc::Sender<ChangeEvent>,
}

async fn feed_loop<S>(source: S, mut cmd_rx: mpsc::Receiver<FeedCommand>, config: FeedConfig)
where
    S: Stream<Item = ChangeEvent> + Send + 'static,
{
    futures::pin_mut!(source);

    let mut registrations: Vec<Registration> = Vec::new();
    let mut next_id: u64 = 0;

    info!("feed routing task started");

    loop {
        tokio::select! {
            command = cmd_rx.recv() => match command {
                Some(FeedCommand::Subscribe { scope, reply }) => {
                    next_id += 1;
                    let (tx, rx) = mpsc::channel(config.subscription_buffer);
                    let registration = Registration { id: next_id, scope, tx };
                    // A caller that gave up before confirmation never
                    // registers at all.
                    if reply.send((next_id, rx)).is_ok() {
                        registrations.push(registration);
                        debug!(id = next_id, count = registrations.len(), "subscribed");
                    }
                }
                Some(FeedCommand::Unsubscribe(id)) => {
                    registrations.retain(|r| r.id != id);
                    debug!(id, count = registrations.len(), "unsubscribed");
                }
                Some(FeedCommand::Shutdown) | None => {
                    info!("feed routing task shutting down");
                    break;
                }
            },

            event = source.next() => match event {
                Some(event) => route(&mut registrations, event),
                None => {
                    warn!("change source ended, closing feed");
                    break;
                }
            },
        }
    }
}

/// Deliver one event to every matching registration.
fn route(registrations: &mut Vec<Registration>, event: ChangeEvent) {
    registrations.retain(|registration| {
        if !registration.scope.matches(&event) {
            return true;
        }
        match registration.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                // A subscriber that falls behind loses events rather than
                // blocking routing for everyone else.
                warn!(id = registration.id, "subscriber buffer full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!(id = registration.id, "subscriber closed, deregistering");
                false
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orunlink_shared::protocol::{ChangeOp, Table};
    use serde_json::json;
    use std::time::Duration;

    fn event(table: Table, project: &str) -> ChangeEvent {
        ChangeEvent {
            table,
            op: ChangeOp::Insert,
            row: json!({ "project": project, "content": "x" }),
            committed_at: Utc::now(),
        }
    }

    /// A push-style source for tests: events sent on the returned sender
    /// flow into the feed.
    fn test_source() -> (mpsc::Sender<ChangeEvent>, impl Stream<Item = ChangeEvent>) {
        let (tx, rx) = mpsc::channel::<ChangeEvent>(64);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        (tx, stream)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn events_are_routed_by_scope() {
        let (tx, source) = test_source();
        let feed = spawn_feed(source, FeedConfig::default());

        let mut comments = feed.subscribe(Scope::table(Table::Comments)).await.unwrap();
        let mut scoped = feed
            .subscribe(Scope::filtered(Table::Comments, "project", "p1"))
            .await
            .unwrap();

        tx.send(event(Table::Comments, "p1")).await.unwrap();
        tx.send(event(Table::Comments, "p2")).await.unwrap();
        tx.send(event(Table::ChatMessages, "p1")).await.unwrap();
        settle().await;

        assert_eq!(comments.recv().await.unwrap().row["project"], "p1");
        assert_eq!(comments.recv().await.unwrap().row["project"], "p2");
        let only = scoped.recv().await.unwrap();
        assert_eq!(only.row["project"], "p1");
        assert!(scoped.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_only_affects_its_own_handle() {
        let (tx, source) = test_source();
        let feed = spawn_feed(source, FeedConfig::default());

        let scope = Scope::filtered(Table::ChatMessages, "project", "p1");
        let mut first = feed.subscribe(scope.clone()).await.unwrap();
        let mut second = feed.subscribe(scope).await.unwrap();

        tx.send(event(Table::ChatMessages, "p1")).await.unwrap();
        settle().await;
        assert!(first.recv().await.is_some());
        assert!(second.recv().await.is_some());

        first.unsubscribe().await;

        // An event fired after teardown must not reach the first handle.
        tx.send(event(Table::ChatMessages, "p1")).await.unwrap();
        settle().await;
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn dropping_a_subscription_deregisters_it() {
        let (tx, source) = test_source();
        let feed = spawn_feed(source, FeedConfig::default());

        let scope = Scope::table(Table::Notifications);
        let first = feed.subscribe(scope.clone()).await.unwrap();
        let mut second = feed.subscribe(scope).await.unwrap();

        drop(first);
        tx.send(event(Table::Notifications, "p1")).await.unwrap();
        settle().await;
        assert!(second.recv().await.is_some());
    }

    #[tokio::test]
    async fn slow_subscriber_loses_events_without_blocking_others() {
        let (tx, source) = test_source();
        let feed = spawn_feed(
            source,
            FeedConfig {
                subscription_buffer: 1,
            },
        );

        let scope = Scope::table(Table::Comments);
        let mut slow = feed.subscribe(scope.clone()).await.unwrap();
        let mut fast = feed.subscribe(scope).await.unwrap();

        tx.send(event(Table::Comments, "a")).await.unwrap();
        settle().await;
        // Fast consumer drains immediately; slow one leaves its single
        // buffer slot occupied.
        assert!(fast.recv().await.is_some());
        tx.send(event(Table::Comments, "b")).await.unwrap();
        tx.send(event(Table::Comments, "c")).await.unwrap();
        settle().await;

        assert!(fast.recv().await.is_some());
        assert!(fast.recv().await.is_some());

        // The slow subscriber kept only the first event.
        assert_eq!(slow.recv().await.unwrap().row["project"], "a");
        assert!(slow.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_closes_everything() {
        let (_tx, source) = test_source();
        let feed = spawn_feed(source, FeedConfig::default());

        let mut sub = feed.subscribe(Scope::table(Table::Projects)).await.unwrap();
        feed.shutdown().await;
        settle().await;

        assert!(sub.recv().await.is_none());
        assert!(matches!(
            feed.subscribe(Scope::table(Table::Projects)).await,
            Err(FeedError::Closed)
        ));
    }
}
