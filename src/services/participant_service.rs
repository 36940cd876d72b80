//! Participant registration and the personal question set.

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            ParticipantStatus, QuizEntity, SessionEntity, SessionParticipantEntity, SessionStatus,
            ShuffledQuestionEntry,
        },
        quiz_store::Registration,
    },
    dto::{
        format_system_time,
        participant::{JoinResponse, QuestionSetResponse},
    },
    error::ServiceError,
    services::{
        session_service::{load_session, load_session_with_quiz},
        shuffle::{build_order, present_question},
    },
    state::{SharedState, session_machine::phase_window},
};

/// Register a participant in a session. Joining twice is a no-op.
pub async fn join_session(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<JoinResponse, ServiceError> {
    let session = load_session(state, session_id).await?;
    let (participant, inserted) = ensure_registered(state, &session, participant_id).await?;

    Ok(JoinResponse {
        session_id,
        participant_id,
        status: participant.status,
        joined_at: format_system_time(participant.joined_at),
        already_joined: !inserted,
    })
}

/// Return the registration, creating it when absent. The flag reports whether this call inserted it.
async fn ensure_registered(
    state: &SharedState,
    session: &SessionEntity,
    participant_id: Uuid,
) -> Result<(SessionParticipantEntity, bool), ServiceError> {
    let store = state.require_store().await?;
    if let Some(existing) = state
        .store_call(store.find_participant(session.id, participant_id))
        .await?
    {
        return Ok((existing, false));
    }

    if session.status.is_terminal() {
        return Err(ServiceError::InvalidState(format!(
            "session `{}` is {} and no longer accepts participants",
            session.id,
            session.status.as_str()
        )));
    }

    let candidate = SessionParticipantEntity::joined(session.id, participant_id, state.now());
    let registration = state
        .store_call(store.insert_participant(candidate.clone(), session.max_participants))
        .await?;
    match registration {
        Registration::Inserted => {
            info!(session_id = %session.id, %participant_id, "participant joined");
            return Ok((candidate, true));
        }
        Registration::Full => {
            return Err(ServiceError::InvalidState(format!(
                "session `{}` is full ({} participants)",
                session.id,
                session.max_participants.unwrap_or_default()
            )));
        }
        // lost the insert race; the concurrent registration is the one stored
        Registration::Existing => {}
    }

    let stored = state
        .store_call(store.find_participant(session.id, participant_id))
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("participant `{participant_id}` in `{}`", session.id))
        })?;
    Ok((stored, false))
}

/// Serve the participant's personal question set while the quiz is open.
///
/// The ordering is generated on the first fetch and stored; later fetches
/// reuse it. The first fetch also marks the participant as started.
pub async fn get_questions(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<QuestionSetResponse, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    if session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "questions are only available while the quiz is active (session is {})",
            session.status.as_str()
        )));
    }

    let participant = find_or_auto_join(state, &session, participant_id).await?;
    if participant.status.is_finished() {
        return Err(ServiceError::InvalidState(format!(
            "participant `{participant_id}` already finished the quiz"
        )));
    }

    let order = personal_order(state, &session, &quiz, &participant).await?;

    if participant.status == ParticipantStatus::Joined {
        let store = state.require_store().await?;
        let started = state
            .store_call(store.mark_participant_started(session_id, participant_id, state.now()))
            .await?;
        if started {
            debug!(%session_id, %participant_id, "participant started the quiz");
        }
    }

    let mut questions = Vec::with_capacity(order.len());
    for entry in &order {
        if let Some(question) = quiz
            .questions
            .iter()
            .find(|question| question.id == entry.question_id)
        {
            questions.push(present_question(question, entry));
        }
    }
    questions.sort_by_key(|question| question.position);

    Ok(QuestionSetResponse {
        session_id,
        participant_id,
        remaining_millis: phase_window(&session, &quiz).remaining_millis(state.now()),
        questions,
    })
}

async fn find_or_auto_join(
    state: &SharedState,
    session: &SessionEntity,
    participant_id: Uuid,
) -> Result<SessionParticipantEntity, ServiceError> {
    if state.config().auto_join_on_access {
        return ensure_registered(state, session, participant_id)
            .await
            .map(|(participant, _)| participant);
    }

    let store = state.require_store().await?;
    state
        .store_call(store.find_participant(session.id, participant_id))
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "participant `{participant_id}` has not joined session `{}`",
                session.id
            ))
        })
}

/// Stored ordering of a participant, generated and persisted on first use.
pub(crate) async fn personal_order(
    state: &SharedState,
    session: &SessionEntity,
    quiz: &QuizEntity,
    participant: &SessionParticipantEntity,
) -> Result<Vec<ShuffledQuestionEntry>, ServiceError> {
    if let Some(order) = &participant.shuffled_question_order {
        return Ok(order.clone());
    }

    let shuffle_options = quiz.shuffle_options && state.config().allow_option_shuffling;
    let order = build_order(quiz, session.id, participant.participant_id, shuffle_options);
    let store = state.require_store().await?;
    state
        .store_call(store.store_shuffled_order(session.id, participant.participant_id, order))
        .await
}
