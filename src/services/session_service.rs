//! Session lifecycle: conditional phase transitions, auto-submit countdowns and early closing.

use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{
        ParticipantStatus, QuizEntity, SessionEntity, SessionParticipantEntity, SessionStatus,
    },
    error::ServiceError,
    services::{finalization, room_events, scoring::completion_seconds},
    state::{
        SharedState,
        session_machine::{
            SessionEvent, already_reached, next_status, plan_transition, quiz_duration, quiz_end,
        },
    },
};

/// Longest single sleep of a countdown before it re-reads the clock.
const MAX_COUNTDOWN_STEP: Duration = Duration::from_secs(30);

/// Outcome of a conditional session transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// This call moved the session; carries the updated record.
    Applied(SessionEntity),
    /// Another actor moved the session first. Not an error.
    AlreadyApplied,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }
}

pub async fn load_session(state: &SharedState, id: Uuid) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    state
        .store_call(store.find_session(id))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{id}`")))
}

pub async fn load_quiz(state: &SharedState, id: Uuid) -> Result<QuizEntity, ServiceError> {
    let store = state.require_store().await?;
    state
        .store_call(store.find_quiz(id))
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz `{id}`")))
}

/// Load a session together with the quiz it runs.
pub async fn load_session_with_quiz(
    state: &SharedState,
    id: Uuid,
) -> Result<(SessionEntity, QuizEntity), ServiceError> {
    let session = load_session(state, id).await?;
    let quiz = load_quiz(state, session.quiz_id).await?;
    Ok((session, quiz))
}

/// Apply `event` to `session` through a conditional update guarded by its current status.
///
/// Both the scheduler and the admin triggers go through here, so entering a
/// phase always has the same side effects: a room broadcast, an armed
/// countdown for `active`, and a finalization run for `completed`.
pub async fn apply_event(
    state: &SharedState,
    session: &SessionEntity,
    quiz: &QuizEntity,
    event: SessionEvent,
) -> Result<TransitionOutcome, ServiceError> {
    let transition = match plan_transition(session, quiz, event, state.now()) {
        Ok(transition) => transition,
        Err(_) if already_reached(session.status, event) => {
            debug!(
                session_id = %session.id,
                status = session.status.as_str(),
                ?event,
                "session already past the requested phase"
            );
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        Err(err) => return Err(err.into()),
    };
    let store = state.require_store().await?;
    let applied = state
        .store_call(store.transition_session(session.id, session.status, transition.clone()))
        .await?;

    if !applied {
        debug!(
            session_id = %session.id,
            from = session.status.as_str(),
            ?event,
            "session already transitioned by another actor"
        );
        return Ok(TransitionOutcome::AlreadyApplied);
    }

    let mut updated = session.clone();
    transition.apply_to(&mut updated);
    info!(
        session_id = %updated.id,
        from = session.status.as_str(),
        to = updated.status.as_str(),
        ?event,
        "session transitioned"
    );

    room_events::broadcast_phase_changed(state, &updated, quiz);
    match updated.status {
        SessionStatus::Active => arm_countdown(state, &updated, quiz),
        SessionStatus::Completed => {
            disarm_countdown(state, updated.id);
            finalization::spawn_finalization(state.clone(), updated.id);
        }
        SessionStatus::Scheduled | SessionStatus::Instruction | SessionStatus::Cancelled => {}
    }

    Ok(TransitionOutcome::Applied(updated))
}

/// Arm the in-process auto-submit countdown of an active session, once.
pub fn arm_countdown(state: &SharedState, session: &SessionEntity, quiz: &QuizEntity) {
    let Some(deadline) = quiz_end(session, quiz) else {
        return;
    };
    let session_id = session.id;

    if let Entry::Vacant(slot) = state.countdowns().entry(session_id) {
        let task_state = state.clone();
        let handle = tokio::spawn(async move {
            wait_until(&task_state, deadline).await;
            task_state.countdowns().remove(&session_id);
            if let Err(err) = expire_session(&task_state, session_id).await {
                warn!(%session_id, error = %err, "auto-submit failed; the scheduler will retry");
            }
        });
        slot.insert(handle.abort_handle());
        debug!(%session_id, "auto-submit countdown armed");
    }
}

fn disarm_countdown(state: &SharedState, session_id: Uuid) {
    if let Some((_, handle)) = state.countdowns().remove(&session_id) {
        handle.abort();
    }
}

async fn wait_until(state: &SharedState, deadline: SystemTime) {
    loop {
        let remaining = deadline
            .duration_since(state.now())
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            break;
        }
        sleep(remaining.min(MAX_COUNTDOWN_STEP)).await;
    }
}

/// Close an active session whose quiz time is over.
///
/// Every participant still answering is timed out with the full quiz
/// duration (one failure does not stop the others), then the session moves
/// to `completed`. Returns whether this call closed the session.
pub async fn expire_session(state: &SharedState, session_id: Uuid) -> Result<bool, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    if session.status != SessionStatus::Active {
        return Ok(false);
    }
    let Some(deadline) = quiz_end(&session, &quiz) else {
        return Ok(false);
    };
    if state.now() < deadline {
        return Ok(false);
    }

    let full = quiz_duration(&quiz).as_secs() as u32;
    let timed_out = time_out_started(state, &session, deadline, |_| full).await?;
    if timed_out > 0 {
        info!(%session_id, timed_out, "auto-submitted participants at quiz end");
    }

    let outcome = apply_event(state, &session, &quiz, SessionEvent::QuizElapsed).await?;
    Ok(outcome.is_applied())
}

/// Admin trigger opening the instruction phase.
pub async fn start_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<TransitionOutcome, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    apply_event(state, &session, &quiz, SessionEvent::AdminStart).await
}

/// Admin trigger closing the quiz before its time is over.
///
/// Participants still answering are timed out with the time they actually spent.
pub async fn end_session(
    state: &SharedState,
    session_id: Uuid,
) -> Result<TransitionOutcome, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    if already_reached(session.status, SessionEvent::AdminEnd) {
        return Ok(TransitionOutcome::AlreadyApplied);
    }
    next_status(session.status, SessionEvent::AdminEnd)?;

    let now = state.now();
    let duration = quiz_duration(&quiz);
    time_out_started(state, &session, now, |participant| {
        completion_seconds(participant.joined_at, now, duration)
    })
    .await?;

    apply_event(state, &session, &quiz, SessionEvent::AdminEnd).await
}

async fn time_out_started<F>(
    state: &SharedState,
    session: &SessionEntity,
    at: SystemTime,
    completion: F,
) -> Result<usize, ServiceError>
where
    F: Fn(&SessionParticipantEntity) -> u32,
{
    let store = state.require_store().await?;
    let participants = state
        .store_call(store.list_participants(session.id))
        .await?;

    let mut timed_out = 0;
    for participant in participants
        .into_iter()
        .filter(|participant| participant.status == ParticipantStatus::Started)
    {
        let seconds = completion(&participant);
        let result = state
            .store_call(store.mark_participant_timed_out(
                session.id,
                participant.participant_id,
                at,
                seconds,
            ))
            .await;

        match result {
            Ok(true) => {
                timed_out += 1;
                let finished = SessionParticipantEntity {
                    status: ParticipantStatus::Timeout,
                    submitted_at: Some(at),
                    completion_time_seconds: Some(seconds),
                    ..participant
                };
                room_events::broadcast_participant_finished(state, &finished);
            }
            Ok(false) => debug!(
                session_id = %session.id,
                participant_id = %participant.participant_id,
                "participant finished before the timeout"
            ),
            Err(err) => warn!(
                session_id = %session.id,
                participant_id = %participant.participant_id,
                error = %err,
                "failed to time out participant"
            ),
        }
    }

    Ok(timed_out)
}
