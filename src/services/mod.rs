/// Quiz authoring, scheduling and manual lifecycle triggers.
pub mod admin_service;
/// OpenAPI documentation generation.
pub mod documentation;
/// One-time computation of results and prizes.
pub mod finalization;
/// Health check service.
pub mod health_service;
/// Registration and personal question sets.
pub mod participant_service;
/// Read-only session views.
pub mod public_service;
/// Broadcast payloads sent to session rooms and operators.
pub mod room_events;
/// Periodic driver of automatic phase transitions.
pub mod scheduler;
/// Scoring, completion times and prize ranking.
pub mod scoring;
/// Session phase transitions and auto-submit countdowns.
pub mod session_service;
/// Deterministic per-participant question ordering.
pub mod shuffle;
/// Server-Sent Events streaming.
pub mod sse_service;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// Answer ingestion and final submissions.
pub mod submission_service;
