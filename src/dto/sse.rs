use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dao::models::{ParticipantStatus, SessionStatus};
use crate::dto::session::PrizeWinnerView;

#[derive(Clone, Debug)]
/// Dispatched payload carried across SSE channels.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Build an event from an already rendered data field.
    pub fn new(event: Option<String>, data: String) -> Self {
        Self { event, data }
    }

    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the stream (`session` or `admin`).
    pub stream: String,
    /// Session the stream is bound to, absent for the admin stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast whenever a session enters a new phase.
pub struct PhaseChangedEvent {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub phase_start_time: Option<String>,
    pub phase_end_time: Option<String>,
    pub remaining_millis: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Sent to operators when a participant submits or times out.
pub struct ParticipantFinishedEvent {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub status: ParticipantStatus,
    pub completion_time_seconds: Option<u32>,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once results and prizes of a session are readable.
pub struct ResultsReadyEvent {
    pub session_id: Uuid,
    pub winners: Vec<PrizeWinnerView>,
}
