use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::Stream;
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::sse_service::{self, StreamKind},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Phase changes and results of one session", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown session")
    )
)]
/// Stream the room of a session: phase changes and the results announcement.
pub async fn session_stream(
    State(state): State<SharedState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let (receiver, handshake) = sse_service::subscribe_session(&state, session_id).await?;
    info!(%session_id, "new session SSE connection");
    Ok(sse_service::to_sse_stream(
        receiver,
        handshake,
        StreamKind::Session(session_id),
    ))
}

#[utoipa::path(
    get,
    path = "/sse/admin",
    tag = "sse",
    params(("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured")),
    responses((status = 200, description = "Operator events across every session", content_type = "text/event-stream", body = String))
)]
/// Stream operator events: every phase change, submission and results announcement.
pub async fn admin_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (receiver, handshake) = sse_service::subscribe_admin(&state);
    info!("new admin SSE connection");
    sse_service::to_sse_stream(receiver, handshake, StreamKind::Admin)
}

/// Public event streams; the admin stream is mounted by the admin router.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new().route("/sessions/{id}/events", get(session_stream))
}
