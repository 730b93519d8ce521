use thiserror::Error;

/// Errors produced by the shared protocol helpers.
#[derive(Error, Debug)]
pub enum SharedError {
    /// A change event's row payload did not decode into the expected model.
    #[error("Row decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// A row payload was missing a column the caller required.
    #[error("Missing column: {0}")]
    MissingColumn(String),

    /// An id field did not parse as a UUID.
    #[error("Invalid id: {0}")]
    InvalidId(#[from] uuid::Error),
}
