//! Read-only views served to participants: phase status, results and prizes.

use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionStatus},
    dto::{
        format_system_time,
        session::{PrizeBoardResponse, ResultView, SessionResultsResponse, SessionStatusResponse},
    },
    error::ServiceError,
    services::{
        room_events::phase_changed_event,
        scoring::ranking_order,
        session_service::{load_session, load_session_with_quiz},
    },
    state::SharedState,
};

/// Current phase of a session, for clients that poll instead of streaming.
pub async fn session_status(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionStatusResponse, ServiceError> {
    let (session, quiz) = load_session_with_quiz(state, session_id).await?;
    let snapshot = phase_changed_event(state, &session, &quiz);

    Ok(SessionStatusResponse {
        session_id,
        status: snapshot.status,
        phase_start_time: snapshot.phase_start_time,
        phase_end_time: snapshot.phase_end_time,
        remaining_millis: snapshot.remaining_millis,
        server_time: format_system_time(state.now()),
    })
}

/// Rankings are hidden until the session is over and its results are stored.
fn ensure_results_published(session: &SessionEntity) -> Result<(), ServiceError> {
    if session.status != SessionStatus::Completed {
        return Err(ServiceError::InvalidState(format!(
            "results are published once the session is completed (session is {})",
            session.status.as_str()
        )));
    }
    if !session.prizes_calculated {
        return Err(ServiceError::InvalidState(
            "results of this session are still being computed".into(),
        ));
    }
    Ok(())
}

pub async fn session_results(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionResultsResponse, ServiceError> {
    let session = load_session(state, session_id).await?;
    ensure_results_published(&session)?;

    let store = state.require_store().await?;
    let mut results = state.store_call(store.list_results(session_id)).await?;
    results.sort_by(ranking_order);

    Ok(SessionResultsResponse {
        session_id,
        results: results.into_iter().map(ResultView::from).collect(),
    })
}

pub async fn prize_winners(
    state: &SharedState,
    session_id: Uuid,
) -> Result<PrizeBoardResponse, ServiceError> {
    let session = load_session(state, session_id).await?;
    ensure_results_published(&session)?;

    let store = state.require_store().await?;
    let mut winners = state
        .store_call(store.list_prize_winners(session_id))
        .await?;
    winners.sort_by_key(|winner| winner.position);

    Ok(PrizeBoardResponse {
        session_id,
        winners: winners.into_iter().map(Into::into).collect(),
    })
}
