/// Error Module
///
/// Error taxonomy shared by the loaders, the reconciler, and the persistence session.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IngestError>;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Unparseable timestamp or missing required field. Recorded per record, never fatal.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// Unique-constraint violation on write. Loaders treat it as an already-stored record.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Connection or transaction failure. Aborts the current batch or pass.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] sqlx::Error),
}

impl IngestError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInput(message.into())
    }

    /// Classify an error raised by a write, separating lost insert races from store failures
    pub fn from_write(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::DuplicateKey(db_err.message().to_string())
            }
            _ => Self::StoreUnavailable(err),
        }
    }

    /// Whether re-running the whole batch or pass may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}
