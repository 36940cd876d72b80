//! Answer ingestion and final submissions.
//!
//! Both paths rely on conditional storage updates rather than locks: answers
//! are upserted by their natural key and the `submitted` transition only
//! applies while the participant is still answering.

use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::models::{AnswerEntity, ParticipantStatus, SessionStatus},
    dto::{
        format_optional_time, format_system_time,
        participant::{AnswerAck, SubmissionResponse, SubmitAnswerRequest},
        validation::{normalize_answer, validate_answer_option},
    },
    error::ServiceError,
    services::{
        finalization::spawn_completion_check,
        participant_service::personal_order,
        room_events,
        scoring::completion_seconds,
        session_service::load_session_with_quiz,
        shuffle::canonical_answer,
    },
    state::{
        SharedState,
        session_machine::{quiz_duration, quiz_end},
    },
};

/// Record (or overwrite) a participant's answer to one question.
pub async fn submit_answer(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
    request: SubmitAnswerRequest,
) -> Result<AnswerAck, ServiceError> {
    validate_answer_option(&request.selected_answer)
        .map_err(|err| ServiceError::InvalidInput(err.to_string()))?;
    let displayed = normalize_answer(&request.selected_answer);

    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    let now = state.now();
    let open = session.status == SessionStatus::Active
        && quiz_end(&session, &quiz).is_some_and(|deadline| now < deadline);
    if !open {
        return Err(ServiceError::InvalidState(
            "answers are only accepted while the quiz is open".into(),
        ));
    }

    let store = state.require_store().await?;
    let participant = state
        .store_call(store.find_participant(session_id, participant_id))
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "participant `{participant_id}` in session `{session_id}`"
            ))
        })?;
    if participant.status != ParticipantStatus::Started {
        return Err(ServiceError::InvalidState(format!(
            "participant `{participant_id}` is {}, answers require a started quiz",
            participant.status.as_str()
        )));
    }

    let question = quiz
        .questions
        .iter()
        .find(|question| question.id == request.question_id)
        .ok_or_else(|| {
            ServiceError::InvalidInput(format!(
                "question `{}` is not part of this quiz",
                request.question_id
            ))
        })?;

    let order = personal_order(state, &session, &quiz, &participant).await?;
    let canonical = order
        .iter()
        .find(|entry| entry.question_id == question.id)
        .map(|entry| canonical_answer(entry, &displayed))
        .unwrap_or_else(|| displayed.clone());

    let answer = AnswerEntity {
        session_id,
        participant_id,
        question_id: question.id,
        is_correct: canonical == question.correct_answer,
        selected_answer: canonical,
        time_taken_seconds: request.time_taken_seconds,
        answered_at: now,
    };
    state.store_call(store.upsert_answer(answer)).await?;
    debug!(%session_id, %participant_id, question_id = %question.id, "answer recorded");

    Ok(AnswerAck {
        question_id: question.id,
        selected_answer: displayed,
        answered_at: format_system_time(now),
    })
}

/// Finalize a participant's quiz. At most one call wins; the others report the stored submission.
///
/// The response does not wait for ranking: the completion check runs in the
/// background and results stay hidden until the whole session is over.
pub async fn finalize_participant(
    state: &SharedState,
    session_id: Uuid,
    participant_id: Uuid,
) -> Result<SubmissionResponse, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    let store = state.require_store().await?;
    let existing = state
        .store_call(store.find_participant(session_id, participant_id))
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!(
                "participant `{participant_id}` in session `{session_id}`"
            ))
        })?;

    if !existing.status.is_finished() && session.status != SessionStatus::Active {
        return Err(ServiceError::InvalidState(format!(
            "submissions are only accepted while the quiz is active (session is {})",
            session.status.as_str()
        )));
    }

    let now = state.now();
    let completion = completion_seconds(existing.joined_at, now, quiz_duration(&quiz));

    let submitted = if existing.status.is_finished() {
        None
    } else {
        state
            .store_call(store.mark_participant_submitted(
                session_id,
                participant_id,
                now,
                completion,
            ))
            .await?
    };

    match submitted {
        Some(participant) => {
            info!(
                %session_id,
                %participant_id,
                completion_time_seconds = completion,
                "participant submitted"
            );
            room_events::broadcast_participant_finished(state, &participant);
            spawn_completion_check(state.clone(), session_id);
            Ok(SubmissionResponse {
                session_id,
                participant_id,
                status: participant.status,
                submitted_at: format_optional_time(participant.submitted_at),
                completion_time_seconds: participant.completion_time_seconds,
                already_submitted: false,
            })
        }
        None => {
            let stored = state
                .store_call(store.find_participant(session_id, participant_id))
                .await?
                .unwrap_or(existing);
            debug!(%session_id, %participant_id, "participant already submitted");
            Ok(SubmissionResponse {
                session_id,
                participant_id,
                status: stored.status,
                submitted_at: format_optional_time(stored.submitted_at),
                completion_time_seconds: stored.completion_time_seconds,
                already_submitted: true,
            })
        }
    }
}
