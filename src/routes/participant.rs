use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::participant::{
        AnswerAck, JoinResponse, QuestionSetResponse, SubmissionResponse, SubmitAnswerRequest,
    },
    error::AppError,
    services::{participant_service, submission_service},
    state::SharedState,
};

/// Participant-facing endpoints, all scoped to one session and one participant.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sessions/{id}/participants/{pid}/join", post(join_session))
        .route(
            "/sessions/{id}/participants/{pid}/questions",
            get(get_questions),
        )
        .route("/sessions/{id}/participants/{pid}/answers", post(submit_answer))
        .route("/sessions/{id}/participants/{pid}/submit", post(submit_quiz))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/participants/{pid}/join",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    responses(
        (status = 200, description = "Participant registered (or already was)", body = JoinResponse),
        (status = 409, description = "Session closed or full")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<JoinResponse>, AppError> {
    Ok(Json(participant_service::join_session(&state, id, pid).await?))
}

#[utoipa::path(
    get,
    path = "/sessions/{id}/participants/{pid}/questions",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    responses(
        (status = 200, description = "Personal question order, without answers", body = QuestionSetResponse),
        (status = 409, description = "Quiz not active or already finished")
    )
)]
/// Fetch the participant's questions; the first fetch starts their quiz.
pub async fn get_questions(
    State(state): State<SharedState>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<QuestionSetResponse>, AppError> {
    Ok(Json(participant_service::get_questions(&state, id, pid).await?))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/participants/{pid}/answers",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer stored", body = AnswerAck),
        (status = 400, description = "Unknown option or question"),
        (status = 409, description = "Quiz closed for this participant")
    )
)]
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
    Valid(Json(payload)): Valid<Json<SubmitAnswerRequest>>,
) -> Result<Json<AnswerAck>, AppError> {
    Ok(Json(
        submission_service::submit_answer(&state, id, pid, payload).await?,
    ))
}

#[utoipa::path(
    post,
    path = "/sessions/{id}/participants/{pid}/submit",
    tag = "participants",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("pid" = Uuid, Path, description = "Participant identifier")
    ),
    responses(
        (status = 200, description = "Quiz finalized for the participant", body = SubmissionResponse),
        (status = 409, description = "Session not active")
    )
)]
/// Finalize the participant's quiz. Repeated calls report the first submission.
pub async fn submit_quiz(
    State(state): State<SharedState>,
    Path((id, pid)): Path<(Uuid, Uuid)>,
) -> Result<Json<SubmissionResponse>, AppError> {
    Ok(Json(
        submission_service::finalize_participant(&state, id, pid).await?,
    ))
}
