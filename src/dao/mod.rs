/// Persisted record definitions.
pub mod models;
/// Storage contract and its backends.
pub mod quiz_store;
/// Backend-agnostic storage errors.
pub mod storage;
