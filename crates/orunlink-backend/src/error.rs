use thiserror::Error;

/// Errors produced by the backend facade.
///
/// The facade never retries; a failed call surfaces here and the caller is
/// responsible for the user-facing message and for leaving prior local
/// state unchanged.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Missing or invalid access token.
    #[error("Not signed in")]
    Unauthorized,

    /// Wrong email/password combination.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Signup with an email or username that is already taken.
    #[error("An account with this email or username already exists")]
    DuplicateUser,

    /// The requested row does not exist.
    #[error("Record not found")]
    NotFound,

    /// The caller is not allowed to perform this operation
    /// (e.g. a non-owner editing a project).
    #[error("Not allowed")]
    Forbidden,

    /// The operation conflicts with current state
    /// (e.g. deciding an already-decided join request).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Client-side validation failed before any network call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transport-level failure talking to the hosted service.
    #[error("Backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A response body did not parse.
    #[error("Backend response decode error: {0}")]
    Serde(#[from] serde_json::Error),

    /// The backend connection or change feed has been closed.
    #[error("Backend connection closed")]
    Closed,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BackendError>;
