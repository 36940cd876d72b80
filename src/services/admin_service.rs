//! Business logic behind the admin routes: authoring quizzes, scheduling
//! sessions and the manual lifecycle triggers.

use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{QuestionEntity, QuizEntity, SessionEntity, SessionStatus},
    dto::{
        admin::{
            CreateQuizRequest, CreateSessionRequest, PrizeCalculationResponse, QuizSummary,
            TransitionResponse,
        },
        parse_timestamp,
        session::SessionSummary,
        validation::normalize_answer,
    },
    error::ServiceError,
    services::{
        finalization,
        session_service::{self, TransitionOutcome, load_quiz, load_session},
    },
    state::SharedState,
};

/// Store a new quiz definition. Option letters are normalised to lowercase.
pub async fn create_quiz(
    state: &SharedState,
    request: CreateQuizRequest,
) -> Result<QuizSummary, ServiceError> {
    let questions = request
        .questions
        .into_iter()
        .map(|question| QuestionEntity {
            id: Uuid::new_v4(),
            prompt: question.prompt.trim().to_string(),
            options: question
                .options
                .into_iter()
                .map(|(letter, text)| (normalize_answer(&letter), text))
                .collect(),
            correct_answer: normalize_answer(&question.correct_answer),
        })
        .collect();

    let quiz = QuizEntity {
        id: Uuid::new_v4(),
        title: request.title.trim().to_string(),
        questions,
        instruction_time_minutes: request.instruction_time_minutes,
        quiz_time_minutes: request.quiz_time_minutes,
        shuffle_questions: request.shuffle_questions,
        shuffle_options: request.shuffle_options,
        created_at: state.now(),
    };

    let store = state.require_store().await?;
    state.store_call(store.save_quiz(quiz.clone())).await?;
    info!(quiz_id = %quiz.id, questions = quiz.questions.len(), "quiz created");

    Ok(QuizSummary::from(&quiz))
}

/// Schedule a session of an existing quiz.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionSummary, ServiceError> {
    let start_time = parse_timestamp(&request.start_time).map_err(|err| {
        ServiceError::InvalidInput(format!(
            "`{}` is not an RFC 3339 timestamp: {err}",
            request.start_time
        ))
    })?;
    let quiz = load_quiz(state, request.quiz_id).await?;

    let now = state.now();
    let session = SessionEntity {
        id: Uuid::new_v4(),
        quiz_id: quiz.id,
        name: request.name.trim().to_string(),
        status: SessionStatus::Scheduled,
        start_time,
        instruction_start_time: None,
        quiz_start_time: None,
        end_time: None,
        auto_start: request.auto_start,
        max_participants: request.max_participants,
        prizes_calculated: false,
        finalization_claimed_at: None,
        created_at: now,
        updated_at: now,
    };

    let store = state.require_store().await?;
    state.store_call(store.save_session(session.clone())).await?;
    info!(session_id = %session.id, quiz_id = %quiz.id, "session scheduled");

    Ok(SessionSummary::from(session))
}

pub async fn start_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let outcome = session_service::start_session(state, session_id).await?;
    transition_response(state, session_id, outcome).await
}

pub async fn end_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<TransitionResponse, ServiceError> {
    let outcome = session_service::end_session(state, session_id).await?;
    transition_response(state, session_id, outcome).await
}

async fn transition_response(
    state: &SharedState,
    session_id: Uuid,
    outcome: TransitionOutcome,
) -> Result<TransitionResponse, ServiceError> {
    let (status, applied) = match outcome {
        TransitionOutcome::Applied(session) => (session.status, true),
        TransitionOutcome::AlreadyApplied => (load_session(state, session_id).await?.status, false),
    };
    Ok(TransitionResponse {
        session_id,
        status,
        applied,
    })
}

/// Recompute results and prizes of a completed session. Safe to repeat.
pub async fn calculate_prizes(
    state: &SharedState,
    session_id: Uuid,
) -> Result<PrizeCalculationResponse, ServiceError> {
    let (results, winners) = finalization::recalculate(state, session_id).await?;
    info!(%session_id, winners = winners.len(), "prizes recalculated on request");

    Ok(PrizeCalculationResponse {
        session_id,
        results_computed: results.len(),
        winners: winners.into_iter().map(Into::into).collect(),
    })
}
