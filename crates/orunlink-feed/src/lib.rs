//! # orunlink-feed
//!
//! The realtime change listener: one background task owns the backend's
//! change stream and routes each event to every live subscription whose
//! scope matches.  Screens subscribe when they mount and unsubscribe when
//! they unmount; tearing one subscription down never affects another, even
//! when both watch the same scope.

pub mod feed;

mod error;

pub use error::FeedError;
pub use feed::{spawn_feed, FeedConfig, FeedHandle, Subscription};
