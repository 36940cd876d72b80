use std::time::{Duration, SystemTime};

use thiserror::Error;

use crate::dao::models::{QuizEntity, SessionEntity, SessionStatus, SessionTransition};

/// Events that can move a session to its next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The scheduler found an auto-start session inside its start window.
    StartDue,
    /// An admin opened the instruction phase explicitly.
    AdminStart,
    /// The instruction countdown is over.
    InstructionElapsed,
    /// The quiz countdown is over.
    QuizElapsed,
    /// Every registered participant has submitted.
    AllSubmitted,
    /// An admin closed the quiz early.
    AdminEnd,
    /// The session never started and is past the stale cutoff.
    Stale,
}

/// Error returned when an event cannot be applied to a session in its current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The phase the session was in when the event was received.
    pub from: SessionStatus,
    /// The rejected event.
    pub event: SessionEvent,
}

/// Transition table of the session lifecycle.
pub fn next_status(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    let next = match (from, event) {
        (SessionStatus::Scheduled, SessionEvent::StartDue | SessionEvent::AdminStart) => {
            SessionStatus::Instruction
        }
        (SessionStatus::Scheduled, SessionEvent::Stale) => SessionStatus::Cancelled,
        (SessionStatus::Instruction, SessionEvent::InstructionElapsed) => SessionStatus::Active,
        (
            SessionStatus::Active,
            SessionEvent::QuizElapsed | SessionEvent::AllSubmitted | SessionEvent::AdminEnd,
        ) => SessionStatus::Completed,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}

/// Position along the main lifecycle; `None` for the cancelled side branch.
fn lifecycle_rank(status: SessionStatus) -> Option<u8> {
    match status {
        SessionStatus::Scheduled => Some(0),
        SessionStatus::Instruction => Some(1),
        SessionStatus::Active => Some(2),
        SessionStatus::Completed => Some(3),
        SessionStatus::Cancelled => None,
    }
}

/// Phase an event leads to, whatever the session is in now.
fn target_status(event: SessionEvent) -> SessionStatus {
    match event {
        SessionEvent::StartDue | SessionEvent::AdminStart => SessionStatus::Instruction,
        SessionEvent::InstructionElapsed => SessionStatus::Active,
        SessionEvent::QuizElapsed | SessionEvent::AllSubmitted | SessionEvent::AdminEnd => {
            SessionStatus::Completed
        }
        SessionEvent::Stale => SessionStatus::Cancelled,
    }
}

/// Whether a session in `from` is already in or past the phase `event` leads to.
///
/// Such an event lost a race with another actor and is a no-op rather than
/// an invalid request.
pub fn already_reached(from: SessionStatus, event: SessionEvent) -> bool {
    let target = target_status(event);
    match (lifecycle_rank(from), lifecycle_rank(target)) {
        (Some(current), Some(wanted)) => current >= wanted,
        (None, None) => true,
        _ => false,
    }
}

/// Compute the conditional update that applies `event` to `session`.
///
/// Phase stamps derive from the stored schedule rather than from `now`, so a
/// late scheduler tick does not shift the countdowns. The only exceptions are
/// an admin start ahead of schedule, which opens instructions immediately, and
/// `end_time`, which records when the session actually closed.
pub fn plan_transition(
    session: &SessionEntity,
    quiz: &QuizEntity,
    event: SessionEvent,
    now: SystemTime,
) -> Result<SessionTransition, InvalidTransition> {
    let status = next_status(session.status, event)?;
    let mut transition = SessionTransition {
        status,
        instruction_start_time: None,
        quiz_start_time: None,
        end_time: None,
        updated_at: now,
    };

    match status {
        SessionStatus::Instruction => {
            let stamp = if event == SessionEvent::AdminStart && now < session.start_time {
                now
            } else {
                session.start_time
            };
            transition.instruction_start_time = Some(stamp);
        }
        SessionStatus::Active => {
            let started = session.instruction_start_time.unwrap_or(session.start_time);
            transition.quiz_start_time = Some(started + instruction_duration(quiz));
        }
        SessionStatus::Completed => {
            let floor = session.quiz_start_time.unwrap_or(now);
            transition.end_time = Some(now.max(floor));
        }
        SessionStatus::Scheduled | SessionStatus::Cancelled => {}
    }

    Ok(transition)
}

/// Length of the instruction phase.
pub fn instruction_duration(quiz: &QuizEntity) -> Duration {
    Duration::from_secs(u64::from(quiz.instruction_time_minutes) * 60)
}

/// Length of the answering window.
pub fn quiz_duration(quiz: &QuizEntity) -> Duration {
    Duration::from_secs(u64::from(quiz.quiz_time_minutes) * 60)
}

/// When the instruction phase ends, once it has started.
pub fn instruction_end(session: &SessionEntity, quiz: &QuizEntity) -> Option<SystemTime> {
    session
        .instruction_start_time
        .map(|start| start + instruction_duration(quiz))
}

/// When the quiz closes, once it has opened.
pub fn quiz_end(session: &SessionEntity, quiz: &QuizEntity) -> Option<SystemTime> {
    session
        .quiz_start_time
        .map(|start| start + quiz_duration(quiz))
}

/// Start and end of the phase a session is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseWindow {
    /// When the phase began; the creation time for scheduled sessions.
    pub start: Option<SystemTime>,
    /// When the phase is due to end, `None` for terminal phases.
    pub end: Option<SystemTime>,
}

impl PhaseWindow {
    /// Milliseconds left until the phase ends, clamped at zero.
    pub fn remaining_millis(&self, now: SystemTime) -> Option<u64> {
        let end = self.end?;
        let left = end.duration_since(now).unwrap_or(Duration::ZERO);
        Some(left.as_millis() as u64)
    }
}

/// Window of the phase `session` is currently in, derived from its stamps.
pub fn phase_window(session: &SessionEntity, quiz: &QuizEntity) -> PhaseWindow {
    match session.status {
        SessionStatus::Scheduled => PhaseWindow {
            start: Some(session.created_at),
            end: Some(session.start_time),
        },
        SessionStatus::Instruction => PhaseWindow {
            start: session.instruction_start_time,
            end: instruction_end(session, quiz),
        },
        SessionStatus::Active => PhaseWindow {
            start: session.quiz_start_time,
            end: quiz_end(session, quiz),
        },
        SessionStatus::Completed | SessionStatus::Cancelled => PhaseWindow {
            start: session.end_time.or(Some(session.updated_at)),
            end: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn quiz() -> QuizEntity {
        QuizEntity {
            id: Uuid::new_v4(),
            title: "Rust basics".into(),
            questions: Vec::new(),
            instruction_time_minutes: 5,
            quiz_time_minutes: 15,
            shuffle_questions: true,
            shuffle_options: false,
            created_at: at(0),
        }
    }

    fn session(quiz: &QuizEntity) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            name: "Morning cohort".into(),
            status: SessionStatus::Scheduled,
            start_time: at(1_000),
            instruction_start_time: None,
            quiz_start_time: None,
            end_time: None,
            auto_start: true,
            max_participants: None,
            prizes_calculated: false,
            finalization_claimed_at: None,
            created_at: at(0),
            updated_at: at(0),
        }
    }

    fn step(session: &mut SessionEntity, quiz: &QuizEntity, event: SessionEvent, now: SystemTime) {
        let transition = plan_transition(session, quiz, event, now).unwrap();
        transition.apply_to(session);
    }

    #[test]
    fn full_lifecycle_stamps_follow_the_schedule() {
        let quiz = quiz();
        let mut session = session(&quiz);

        // scheduler fires 20 seconds late
        step(&mut session, &quiz, SessionEvent::StartDue, at(1_020));
        assert_eq!(session.status, SessionStatus::Instruction);
        assert_eq!(session.instruction_start_time, Some(at(1_000)));

        step(&mut session, &quiz, SessionEvent::InstructionElapsed, at(1_310));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.quiz_start_time, Some(at(1_300)));
        assert_eq!(quiz_end(&session, &quiz), Some(at(2_200)));

        step(&mut session, &quiz, SessionEvent::QuizElapsed, at(2_205));
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.end_time, Some(at(2_205)));
        assert_eq!(session.instruction_start_time, Some(at(1_000)));
        assert_eq!(session.quiz_start_time, Some(at(1_300)));
    }

    #[test]
    fn early_admin_start_uses_now() {
        let quiz = quiz();
        let mut session = session(&quiz);
        step(&mut session, &quiz, SessionEvent::AdminStart, at(400));
        assert_eq!(session.instruction_start_time, Some(at(400)));
    }

    #[test]
    fn late_admin_start_keeps_scheduled_time() {
        let quiz = quiz();
        let mut session = session(&quiz);
        step(&mut session, &quiz, SessionEvent::AdminStart, at(1_090));
        assert_eq!(session.instruction_start_time, Some(at(1_000)));
    }

    #[test]
    fn stale_sessions_are_cancelled_only_from_scheduled() {
        assert_eq!(
            next_status(SessionStatus::Scheduled, SessionEvent::Stale),
            Ok(SessionStatus::Cancelled)
        );
        assert!(next_status(SessionStatus::Active, SessionEvent::Stale).is_err());
    }

    #[test]
    fn terminal_phases_reject_every_event() {
        let events = [
            SessionEvent::StartDue,
            SessionEvent::AdminStart,
            SessionEvent::InstructionElapsed,
            SessionEvent::QuizElapsed,
            SessionEvent::AllSubmitted,
            SessionEvent::AdminEnd,
            SessionEvent::Stale,
        ];
        for from in [SessionStatus::Completed, SessionStatus::Cancelled] {
            for event in events {
                assert_eq!(next_status(from, event), Err(InvalidTransition { from, event }));
            }
        }
    }

    #[test]
    fn admin_end_requires_an_open_quiz() {
        let err = next_status(SessionStatus::Instruction, SessionEvent::AdminEnd).unwrap_err();
        assert_eq!(err.from, SessionStatus::Instruction);
        assert_eq!(err.event, SessionEvent::AdminEnd);
    }

    #[test]
    fn repeated_events_are_recognised_as_already_reached() {
        assert!(already_reached(SessionStatus::Completed, SessionEvent::AdminEnd));
        assert!(already_reached(SessionStatus::Active, SessionEvent::AdminStart));
        assert!(already_reached(SessionStatus::Instruction, SessionEvent::StartDue));
        assert!(already_reached(SessionStatus::Completed, SessionEvent::InstructionElapsed));
        assert!(already_reached(SessionStatus::Cancelled, SessionEvent::Stale));

        assert!(!already_reached(SessionStatus::Scheduled, SessionEvent::AdminEnd));
        assert!(!already_reached(SessionStatus::Instruction, SessionEvent::AdminEnd));
        assert!(!already_reached(SessionStatus::Cancelled, SessionEvent::AdminStart));
        assert!(!already_reached(SessionStatus::Completed, SessionEvent::Stale));
    }

    #[test]
    fn end_time_never_precedes_quiz_start() {
        let quiz = quiz();
        let mut session = session(&quiz);
        session.status = SessionStatus::Active;
        session.quiz_start_time = Some(at(2_000));
        let transition =
            plan_transition(&session, &quiz, SessionEvent::AdminEnd, at(1_990)).unwrap();
        assert_eq!(transition.end_time, Some(at(2_000)));
    }

    #[test]
    fn phase_window_reports_remaining_time() {
        let quiz = quiz();
        let mut session = session(&quiz);
        step(&mut session, &quiz, SessionEvent::StartDue, at(1_000));

        let window = phase_window(&session, &quiz);
        assert_eq!(window.start, Some(at(1_000)));
        assert_eq!(window.end, Some(at(1_300)));
        assert_eq!(window.remaining_millis(at(1_100)), Some(200_000));
        assert_eq!(window.remaining_millis(at(1_400)), Some(0));
    }

    #[test]
    fn completed_window_has_no_deadline() {
        let quiz = quiz();
        let mut session = session(&quiz);
        session.status = SessionStatus::Completed;
        session.end_time = Some(at(5_000));
        let window = phase_window(&session, &quiz);
        assert_eq!(window.start, Some(at(5_000)));
        assert_eq!(window.remaining_millis(at(6_000)), None);
    }
}
