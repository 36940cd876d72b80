mod documents;
pub mod error;
pub mod manager;
pub mod store;

pub use error::MongoDaoError;
pub use manager::{MongoManager, connect, ensure_indexes};
pub use store::MongoQuizStore;
