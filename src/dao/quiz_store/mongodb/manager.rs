//! Connection handle and collection layout of the MongoDB backend.
//!
//! The handle never watches its own health: the storage supervisor pings it
//! and asks for a reconnect while the application runs degraded.

use std::{sync::Arc, time::Duration};

use mongodb::{
    Client, Database, IndexModel,
    bson::{Document, doc},
    options::{ClientOptions, IndexOptions},
};
use tokio::{sync::RwLock, time::sleep};
use tracing::{debug, info};

use super::error::{MongoDaoError, Result};

const DEFAULT_DB: &str = "quiz_arena";
/// Pings tried at boot before giving up; a reconnect gets a single one.
const STARTUP_PING_ATTEMPTS: u32 = 10;
const STARTUP_RETRY_DELAY: Duration = Duration::from_millis(250);

pub(super) const SESSIONS: &str = "sessions";
pub(super) const QUIZZES: &str = "quizzes";
pub(super) const PARTICIPANTS: &str = "session_participants";
pub(super) const ANSWERS: &str = "answers";
pub(super) const RESULTS: &str = "results";
pub(super) const PRIZE_BOARDS: &str = "prize_boards";

/// Unique and scan indexes: (collection, index name, keys, unique).
const INDEXES: [(&str, &str, fn() -> Document, bool); 4] = [
    (
        SESSIONS,
        "session_status_start_idx",
        || doc! {"status": 1, "start_time": 1},
        false,
    ),
    (
        PARTICIPANTS,
        "participant_key_idx",
        || doc! {"session_id": 1, "participant_id": 1},
        true,
    ),
    (
        ANSWERS,
        "answer_key_idx",
        || doc! {"session_id": 1, "participant_id": 1, "question_id": 1},
        true,
    ),
    (
        RESULTS,
        "result_key_idx",
        || doc! {"session_id": 1, "participant_id": 1},
        true,
    ),
];

/// Shared database handle whose client can be swapped on reconnect.
#[derive(Clone)]
pub struct MongoManager {
    database: Arc<RwLock<Database>>,
    options: Arc<ClientOptions>,
    database_name: Arc<str>,
}

/// Parse `uri` and open the database, retrying the first ping a few times.
pub async fn connect(uri: &str, db_name: Option<&str>) -> Result<MongoManager> {
    let options = ClientOptions::parse(uri)
        .await
        .map_err(|source| MongoDaoError::InvalidUri {
            uri: uri.to_owned(),
            source,
        })?;
    let database_name: Arc<str> = Arc::from(db_name.unwrap_or(DEFAULT_DB));

    let database = open(&options, &database_name, STARTUP_PING_ATTEMPTS).await?;
    info!(database = %database_name, "connected to MongoDB");

    Ok(MongoManager {
        database: Arc::new(RwLock::new(database)),
        options: Arc::new(options),
        database_name,
    })
}

/// Ensure the indexes backing natural keys and scheduler scans are present.
pub async fn ensure_indexes(database: &Database) -> Result<()> {
    for (collection, index, keys, unique) in INDEXES {
        let model = IndexModel::builder()
            .keys(keys())
            .options(
                IndexOptions::builder()
                    .name(Some(index.to_string()))
                    .unique(Some(unique))
                    .build(),
            )
            .build();
        database
            .collection::<Document>(collection)
            .create_index(model)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection,
                index,
                source,
            })?;
    }
    Ok(())
}

impl MongoManager {
    /// Current database handle.
    pub async fn database(&self) -> Database {
        self.database.read().await.clone()
    }

    pub async fn ping(&self) -> Result<()> {
        self.database()
            .await
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    /// Build a fresh client and swap it in once it answers a ping.
    pub async fn reconnect(&self) -> Result<()> {
        let database = open(&self.options, &self.database_name, 1).await?;
        *self.database.write().await = database;
        info!("MongoDB connection re-established");
        Ok(())
    }
}

async fn open(options: &ClientOptions, database_name: &str, attempts: u32) -> Result<Database> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match database.run_command(doc! { "ping": 1 }).await {
            Ok(_) => return Ok(database),
            Err(source) if attempt >= attempts => {
                return Err(MongoDaoError::InitialPing {
                    attempts: attempt,
                    source,
                });
            }
            Err(err) => {
                debug!(error = %err, attempt, "MongoDB ping failed; retrying");
                sleep(STARTUP_RETRY_DELAY * attempt).await;
            }
        }
    }
}
