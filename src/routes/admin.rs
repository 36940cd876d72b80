use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::{
        admin::{
            CreateQuizRequest, CreateSessionRequest, PrizeCalculationResponse, QuizSummary,
            TransitionResponse,
        },
        session::SessionSummary,
    },
    error::AppError,
    routes::sse::admin_stream,
    services::admin_service,
    state::SharedState,
};

const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Operator endpoints: quiz authoring, scheduling and manual lifecycle triggers.
pub fn router(state: SharedState) -> Router<SharedState> {
    Router::new()
        .route("/admin/quizzes", post(create_quiz))
        .route("/admin/sessions", post(create_session))
        .route("/admin/sessions/{id}/start", post(start_session))
        .route("/admin/sessions/{id}/end", post(end_session))
        .route("/admin/sessions/{id}/prizes", post(calculate_prizes))
        .route("/sse/admin", get(admin_stream))
        .route_layer(middleware::from_fn_with_state(state, require_admin_token))
}

#[utoipa::path(
    post,
    path = "/admin/quizzes",
    tag = "admin",
    params(("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured")),
    request_body = CreateQuizRequest,
    responses(
        (status = 201, description = "Quiz stored", body = QuizSummary),
        (status = 400, description = "Invalid quiz definition")
    )
)]
pub async fn create_quiz(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateQuizRequest>>,
) -> Result<(StatusCode, Json<QuizSummary>), AppError> {
    let quiz = admin_service::create_quiz(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

#[utoipa::path(
    post,
    path = "/admin/sessions",
    tag = "admin",
    params(("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured")),
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session scheduled", body = SessionSummary),
        (status = 404, description = "Unknown quiz")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<SessionSummary>), AppError> {
    let session = admin_service::create_session(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/start",
    tag = "admin",
    params(
        ("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Instruction phase opened, or already open", body = TransitionResponse),
        (status = 409, description = "Session cannot be started from its current phase")
    )
)]
/// Open the instruction phase now, ahead of the scheduled start if needed.
pub async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(admin_service::start_session(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/end",
    tag = "admin",
    params(
        ("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Session completed", body = TransitionResponse),
        (status = 409, description = "Session is not active")
    )
)]
/// Close an active quiz early; participants still answering are timed out.
pub async fn end_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransitionResponse>, AppError> {
    Ok(Json(admin_service::end_session(&state, id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/sessions/{id}/prizes",
    tag = "admin",
    params(
        ("X-Admin-Token" = Option<String>, Header, description = "Admin token, when one is configured"),
        ("id" = Uuid, Path, description = "Session identifier")
    ),
    responses(
        (status = 200, description = "Results and prizes recomputed", body = PrizeCalculationResponse),
        (status = 409, description = "Session not completed")
    )
)]
/// Recompute results and prizes. Repeated calls produce the same board.
pub async fn calculate_prizes(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PrizeCalculationResponse>, AppError> {
    Ok(Json(admin_service::calculate_prizes(&state, id).await?))
}

/// Reject admin calls without the configured token. Open when no token is configured.
async fn require_admin_token(
    State(state): State<SharedState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.config().admin_token.as_deref() else {
        return Ok(next.run(req).await);
    };

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            AppError::Unauthorized("missing admin token header `X-Admin-Token`".into())
        })?;

    if provided == expected {
        Ok(next.run(req).await)
    } else {
        Err(AppError::Unauthorized("invalid admin token".into()))
    }
}
