use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use uuid::Uuid;

use crate::{
    dto::session::{PrizeBoardResponse, SessionResultsResponse, SessionStatusResponse},
    error::AppError,
    services::public_service,
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sessions/{id}/status",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Current phase and time left", body = SessionStatusResponse),
        (status = 404, description = "Unknown session")
    )
)]
/// Poll the current phase of a session.
pub async fn session_status(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    Ok(Json(public_service::session_status(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/results",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Ranked results", body = SessionResultsResponse),
        (status = 409, description = "Session not completed yet")
    )
)]
pub async fn session_results(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResultsResponse>, AppError> {
    Ok(Json(public_service::session_results(&state, id).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/prizes",
    tag = "sessions",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Prize winners by position", body = PrizeBoardResponse),
        (status = 409, description = "Session not completed yet")
    )
)]
pub async fn prize_winners(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PrizeBoardResponse>, AppError> {
    Ok(Json(public_service::prize_winners(&state, id).await?))
}

pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/{id}/status", get(session_status))
        .route("/sessions/{id}/results", get(session_results))
        .route("/sessions/{id}/prizes", get(prize_winners))
}
