use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::{PrizeWinnerEntity, QuizEntity, SessionEntity, SessionParticipantEntity},
    dto::{
        format_optional_time,
        session::PrizeWinnerView,
        sse::{ParticipantFinishedEvent, PhaseChangedEvent, ResultsReadyEvent, ServerEvent},
    },
    state::{SharedState, session_machine::phase_window},
};

const EVENT_PHASE_CHANGED: &str = "phase_changed";
const EVENT_PARTICIPANT_FINISHED: &str = "participant.finished";
const EVENT_RESULTS_READY: &str = "results.ready";

/// Broadcast a session phase change to its room and to operators.
pub fn broadcast_phase_changed(state: &SharedState, session: &SessionEntity, quiz: &QuizEntity) {
    let payload = phase_changed_event(state, session, quiz);
    send_room_event(state, session.id, EVENT_PHASE_CHANGED, &payload);
    send_admin_event(state, EVENT_PHASE_CHANGED, &payload);
}

/// Tell operators that a participant submitted or was timed out.
pub fn broadcast_participant_finished(state: &SharedState, participant: &SessionParticipantEntity) {
    let payload = ParticipantFinishedEvent {
        session_id: participant.session_id,
        participant_id: participant.participant_id,
        status: participant.status,
        completion_time_seconds: participant.completion_time_seconds,
    };
    send_admin_event(state, EVENT_PARTICIPANT_FINISHED, &payload);
}

/// Announce that results and prizes of a session can be read.
pub fn broadcast_results_ready(state: &SharedState, session_id: Uuid, winners: &[PrizeWinnerEntity]) {
    let payload = ResultsReadyEvent {
        session_id,
        winners: winners.iter().cloned().map(PrizeWinnerView::from).collect(),
    };
    send_room_event(state, session_id, EVENT_RESULTS_READY, &payload);
    send_admin_event(state, EVENT_RESULTS_READY, &payload);
}

/// Phase snapshot shared by the broadcast and the status endpoint.
pub fn phase_changed_event(
    state: &SharedState,
    session: &SessionEntity,
    quiz: &QuizEntity,
) -> PhaseChangedEvent {
    let window = phase_window(session, quiz);
    PhaseChangedEvent {
        session_id: session.id,
        status: session.status,
        phase_start_time: format_optional_time(window.start),
        phase_end_time: format_optional_time(window.end),
        remaining_millis: window.remaining_millis(state.now()),
    }
}

fn send_room_event(state: &SharedState, session_id: Uuid, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.rooms().publish(session_id, event),
        Err(err) => warn!(event, %session_id, error = %err, "failed to serialize room payload"),
    }
}

fn send_admin_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.rooms().admin().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize admin payload"),
    }
}
