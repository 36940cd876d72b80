//! One-time computation of results and prizes once a session is over.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, SystemTime},
};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{
        AnswerEntity, ParticipantStatus, PrizeWinnerEntity, QuizEntity, ResultEntity,
        SessionEntity, SessionStatus,
    },
    error::ServiceError,
    services::{
        room_events,
        scoring::{calculate_result, rank_prizes, ranking_order},
        session_service::{apply_event, load_session_with_quiz},
    },
    state::{
        SharedState,
        session_machine::{SessionEvent, quiz_duration},
    },
};

/// How long a finalization claim blocks other finalizers before it is presumed abandoned.
const FINALIZATION_LEASE: Duration = Duration::from_secs(5 * 60);

/// Outcome of a finalization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizationOutcome {
    /// This call computed and stored results and winners.
    Finalized {
        results: Vec<ResultEntity>,
        winners: Vec<PrizeWinnerEntity>,
    },
    /// Another finalizer already holds or completed the claim.
    AlreadyFinalized,
}

/// Whether a session is completed without stored results and nobody is working on it.
///
/// A claim older than the lease counts as abandoned.
pub fn needs_finalization(session: &SessionEntity, now: SystemTime) -> bool {
    session.status == SessionStatus::Completed
        && !session.prizes_calculated
        && session
            .finalization_claimed_at
            .is_none_or(|claimed| claimed + FINALIZATION_LEASE < now)
}

/// Run finalization in the background; failures are logged and stay retryable.
pub fn spawn_finalization(state: SharedState, session_id: Uuid) {
    tokio::spawn(async move {
        match run_finalization(&state, session_id).await {
            Ok(FinalizationOutcome::Finalized { .. }) => {}
            Ok(FinalizationOutcome::AlreadyFinalized) => {
                debug!(%session_id, "session already finalized")
            }
            Err(err) => error!(
                %session_id,
                error = %err,
                "session finalization failed; it can be retried"
            ),
        }
    });
}

/// Check in the background whether a submission completed its session.
pub fn spawn_completion_check(state: SharedState, session_id: Uuid) {
    tokio::spawn(async move {
        if let Err(err) = finalize_if_complete(&state, session_id).await {
            warn!(%session_id, error = %err, "session completion check failed");
        }
    });
}

/// Close the session once every registered participant has finished, and
/// finalize a completed session that is still missing its results.
pub async fn finalize_if_complete(state: &SharedState, session_id: Uuid) -> Result<(), ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;

    match session.status {
        SessionStatus::Active => {
            let store = state.require_store().await?;
            let participants = state.store_call(store.list_participants(session_id)).await?;
            let everyone_finished = !participants.is_empty()
                && participants
                    .iter()
                    .all(|participant| participant.status.is_finished());
            if everyone_finished {
                apply_event(state, &session, &quiz, SessionEvent::AllSubmitted).await?;
            }
        }
        SessionStatus::Completed if !session.prizes_calculated => {
            run_finalization(state, session_id).await?;
        }
        _ => {}
    }

    Ok(())
}

/// Claim the session's finalization and compute results and winners.
///
/// The claim is taken by a conditional update before any work starts, so
/// concurrent finalizers cannot both proceed. `prizes_calculated` is only set
/// once the prize board is stored, which keeps the read APIs closed while the
/// computation runs. A failed run hands the claim back; a claim whose holder
/// died is taken over once its lease has run out.
pub async fn run_finalization(
    state: &SharedState,
    session_id: Uuid,
) -> Result<FinalizationOutcome, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    if session.status != SessionStatus::Completed {
        return Err(ServiceError::InvalidState(format!(
            "session `{session_id}` is {}, not completed",
            session.status.as_str()
        )));
    }

    if session.prizes_calculated {
        return Ok(FinalizationOutcome::AlreadyFinalized);
    }

    let store = state.require_store().await?;
    let now = state.now();
    let stale_before = now.checked_sub(FINALIZATION_LEASE).unwrap_or(SystemTime::UNIX_EPOCH);
    if !state
        .store_call(store.claim_finalization(session_id, now, stale_before))
        .await?
    {
        return Ok(FinalizationOutcome::AlreadyFinalized);
    }

    let computed = match compute_and_store(state, &session, &quiz).await {
        Ok(computed) => state
            .store_call(store.mark_finalized(session_id))
            .await
            .map(|()| computed),
        Err(err) => Err(err),
    };

    match computed {
        Ok((results, winners)) => {
            info!(
                %session_id,
                results = results.len(),
                winners = winners.len(),
                "session finalized"
            );
            room_events::broadcast_results_ready(state, session_id, &winners);
            Ok(FinalizationOutcome::Finalized { results, winners })
        }
        Err(err) => {
            if let Err(release_err) = state.store_call(store.release_finalization(session_id)).await
            {
                error!(%session_id, error = %release_err, "failed to release finalization claim");
            }
            Err(ServiceError::Finalization(err.to_string()))
        }
    }
}

/// Recompute results and winners of a completed session regardless of the flag.
///
/// The computation is deterministic, so repeated runs store identical rows.
pub async fn recalculate(
    state: &SharedState,
    session_id: Uuid,
) -> Result<(Vec<ResultEntity>, Vec<PrizeWinnerEntity>), ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    if session.status != SessionStatus::Completed {
        return Err(ServiceError::InvalidState(
            "prizes can only be calculated once the session is completed".into(),
        ));
    }

    let (results, winners) = compute_and_store(state, &session, &quiz).await?;
    let store = state.require_store().await?;
    state.store_call(store.mark_finalized(session_id)).await?;
    room_events::broadcast_results_ready(state, session_id, &winners);
    Ok((results, winners))
}

/// Produce one result per registered participant, then replace the prize board.
async fn compute_and_store(
    state: &SharedState,
    session: &SessionEntity,
    quiz: &QuizEntity,
) -> Result<(Vec<ResultEntity>, Vec<PrizeWinnerEntity>), ServiceError> {
    let store = state.require_store().await?;
    let participants = state.store_call(store.list_participants(session.id)).await?;
    let answers = state.store_call(store.list_answers(session.id)).await?;

    let question_ids: HashSet<Uuid> = quiz.questions.iter().map(|question| question.id).collect();
    let mut by_participant: HashMap<Uuid, Vec<&AnswerEntity>> = HashMap::new();
    for answer in answers
        .iter()
        .filter(|answer| question_ids.contains(&answer.question_id))
    {
        by_participant
            .entry(answer.participant_id)
            .or_default()
            .push(answer);
    }

    let total_questions = quiz.questions.len() as u32;
    let full_duration = quiz_duration(quiz).as_secs() as u32;
    let mut results = Vec::with_capacity(participants.len());
    for participant in &participants {
        let completion = match participant.status {
            ParticipantStatus::Submitted | ParticipantStatus::Timeout => participant
                .completion_time_seconds
                .unwrap_or(full_duration),
            ParticipantStatus::Joined | ParticipantStatus::Started => full_duration,
        };
        let result = calculate_result(
            participant,
            total_questions,
            by_participant
                .get(&participant.participant_id)
                .into_iter()
                .flatten()
                .copied(),
            completion,
        );
        state.store_call(store.upsert_result(result.clone())).await?;
        results.push(result);
    }

    results.sort_by(ranking_order);
    let winners = rank_prizes(session.id, &results, state.config().prize_positions);
    state
        .store_call(store.replace_prize_winners(session.id, winners.clone()))
        .await?;

    Ok((results, winners))
}
