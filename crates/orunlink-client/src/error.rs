use thiserror::Error;

use orunlink_backend::BackendError;
use orunlink_feed::FeedError;

/// Errors surfaced to the embedding UI.
///
/// Nothing here is fatal to the application process; every failure is
/// scoped to the user action that triggered it.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A facade call failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// The realtime feed refused a subscription.
    #[error("Realtime feed error: {0}")]
    Feed(#[from] FeedError),

    /// Reading or writing the transient cache failed.
    #[error("Cache IO error: {0}")]
    Cache(#[from] std::io::Error),

    /// A cached file did not parse.
    #[error("Cache format error: {0}")]
    CacheFormat(#[from] serde_json::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// An operation needing a signed-in user ran without one.
    #[error("Not signed in")]
    NotSignedIn,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;
