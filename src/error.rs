//! Error kinds surfaced by the collection engine.
//!
//! Every fallible operation in the library returns [`Result`]. The variants
//! map one-to-one onto the API error codes served by the HTTP layer, so
//! handlers can translate without string matching.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Entry, chunk id, or collection missing.
    #[error("not found: {0}")]
    NotFound(String),

    /// `store` called for a basename the collection already knows.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Empty text, unsupported file extension, malformed URL.
    #[error("invalid input: {0}")]
    Invalid(String),

    /// Operation not implemented by the selected backend.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Embedding RPC, HTTP fetch, or git clone failure. Retryable.
    #[error("transient failure: {0}")]
    Transient(String),

    /// State file unreadable and not legacy-parseable.
    #[error("corrupt state: {0}")]
    Corrupt(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a caller may reasonably retry the operation.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Internal(format!("serialization failed: {err}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
