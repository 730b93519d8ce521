use thiserror::Error;

/// Errors produced by the feed layer.
#[derive(Error, Debug)]
pub enum FeedError {
    /// The routing task is gone (shut down or its source ended).
    #[error("Feed is closed")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FeedError>;
