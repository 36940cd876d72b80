use std::error::Error;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for every [`QuizStore`](crate::dao::quiz_store::QuizStore) operation.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying database.
///
/// Lost conditional updates are not errors: the store reports them as `false`
/// (or `None`) so callers can treat a concurrent winner as a benign no-op.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// A conditional update targeted a record that does not exist at all.
    #[error("{kind} `{id}` does not exist")]
    MissingRecord { kind: &'static str, id: Uuid },
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    pub fn missing(kind: &'static str, id: Uuid) -> Self {
        StorageError::MissingRecord { kind, id }
    }
}
