use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

use crate::dao::storage::StorageError;

pub type Result<T> = std::result::Result<T, MongoDaoError>;

const DUPLICATE_KEY_CODE: i32 = 11000;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to {operation} {collection} record `{id}`")]
    Record {
        operation: &'static str,
        collection: &'static str,
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list {collection} for `{scope}`")]
    List {
        collection: &'static str,
        scope: String,
        #[source]
        source: MongoError,
    },
    #[error("stored {collection} document holds malformed field `{field}`")]
    Malformed {
        collection: &'static str,
        field: &'static str,
    },
}

impl MongoDaoError {
    pub fn record(
        operation: &'static str,
        collection: &'static str,
        id: Uuid,
    ) -> impl FnOnce(MongoError) -> Self {
        move |source| MongoDaoError::Record {
            operation,
            collection,
            id,
            source,
        }
    }

    pub fn list(collection: &'static str, scope: impl ToString) -> impl FnOnce(MongoError) -> Self {
        let scope = scope.to_string();
        move |source| MongoDaoError::List {
            collection,
            scope,
            source,
        }
    }
}

/// Whether the driver rejected a write because of a unique index.
pub fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY_CODE
    )
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
