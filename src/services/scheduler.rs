//! Periodic driver of the automatic session transitions.
//!
//! Each tick runs five scans in order: stale cleanup (throttled), auto-start
//! of due sessions, instruction to active, recovery of active sessions whose
//! countdown was lost, and a restart of finalizations that never stored their
//! results. Every transition goes through the same
//! conditional update as the admin triggers, so a tick racing an operator is
//! harmless.

use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};

use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::seconds_between,
    dao::models::{QuizEntity, SessionEntity, SessionStatus},
    error::ServiceError,
    services::{
        finalization::{needs_finalization, spawn_finalization},
        session_service::{apply_event, arm_countdown, expire_session, load_quiz},
    },
    state::{
        SharedState,
        session_machine::{SessionEvent, instruction_end, quiz_end},
    },
};

/// Transitions performed by one scheduler tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub cancelled: u64,
    pub started: usize,
    pub activated: usize,
    pub expired: usize,
    /// Completed sessions whose finalization was restarted.
    pub finalizing: usize,
}

impl TickReport {
    fn is_idle(&self) -> bool {
        *self == Self::default()
    }
}

pub struct Scheduler {
    state: SharedState,
    last_cleanup: Option<SystemTime>,
}

impl Scheduler {
    pub fn new(state: SharedState) -> Self {
        Self {
            state,
            last_cleanup: None,
        }
    }

    /// Tick forever at the configured poll interval.
    ///
    /// A tick never runs longer than the interval itself; work that overruns
    /// is dropped and picked up again by the next tick.
    pub async fn run(mut self) {
        let poll = self.state.config().scheduler.poll_interval;
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(poll_secs = poll.as_secs(), "session scheduler started");

        loop {
            ticker.tick().await;
            match timeout(poll, self.tick()).await {
                Ok(Ok(report)) if report.is_idle() => {}
                Ok(Ok(report)) => info!(
                    cancelled = report.cancelled,
                    started = report.started,
                    activated = report.activated,
                    expired = report.expired,
                    finalizing = report.finalizing,
                    "scheduler tick applied transitions"
                ),
                Ok(Err(ServiceError::Degraded)) => {
                    debug!("scheduler tick skipped: storage unavailable")
                }
                Ok(Err(err)) => warn!(error = %err, "scheduler tick failed"),
                Err(_) => warn!(
                    poll_secs = poll.as_secs(),
                    "scheduler tick exceeded the poll interval"
                ),
            }
        }
    }

    /// Run every scan once. Failures of a single session are logged and skipped.
    pub async fn tick(&mut self) -> Result<TickReport, ServiceError> {
        // fail fast while degraded instead of logging one error per scan
        self.state.require_store().await?;

        let now = self.state.now();
        let mut quizzes = HashMap::new();
        let mut report = TickReport::default();

        report.cancelled = self.cleanup_stale(now).await;
        report.started = self.start_due(now, &mut quizzes).await?;
        report.activated = self.activate_elapsed(now, &mut quizzes).await?;
        report.expired = self.recover_active(now, &mut quizzes).await?;
        report.finalizing = self.resume_finalization(now).await?;

        Ok(report)
    }

    async fn cleanup_stale(&mut self, now: SystemTime) -> u64 {
        let config = &self.state.config().scheduler;
        let due = self.last_cleanup.is_none_or(|last| {
            now.duration_since(last).unwrap_or(Duration::ZERO) >= config.stale_cleanup_interval
        });
        if !due {
            return 0;
        }

        let Some(cutoff) = now.checked_sub(config.stale_after) else {
            self.last_cleanup = Some(now);
            return 0;
        };

        let result = match self.state.require_store().await {
            Ok(store) => {
                self.state
                    .store_call(store.cancel_stale_sessions(cutoff, now))
                    .await
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(cancelled) => {
                self.last_cleanup = Some(now);
                if cancelled > 0 {
                    info!(cancelled, "cancelled stale scheduled sessions");
                }
                cancelled
            }
            Err(err) => {
                warn!(error = %err, "stale session cleanup failed");
                0
            }
        }
    }

    async fn start_due(
        &self,
        now: SystemTime,
        quizzes: &mut HashMap<Uuid, QuizEntity>,
    ) -> Result<usize, ServiceError> {
        let config = &self.state.config().scheduler;
        let window = config.auto_start_window.as_secs() as i64;
        let ceiling = config.late_start_ceiling.as_secs() as i64;

        let mut started = 0;
        for session in self.sessions_in(SessionStatus::Scheduled).await? {
            if !session.auto_start {
                continue;
            }
            let past_start = seconds_between(session.start_time, now);
            if past_start < 0 {
                continue;
            }
            if past_start > window || past_start >= ceiling {
                debug!(
                    session_id = %session.id,
                    past_start,
                    "session missed its auto-start window"
                );
                continue;
            }

            if self
                .transition(&session, SessionEvent::StartDue, quizzes)
                .await
            {
                started += 1;
            }
        }
        Ok(started)
    }

    async fn activate_elapsed(
        &self,
        now: SystemTime,
        quizzes: &mut HashMap<Uuid, QuizEntity>,
    ) -> Result<usize, ServiceError> {
        let mut activated = 0;
        for session in self.sessions_in(SessionStatus::Instruction).await? {
            if session.instruction_start_time.is_none() {
                continue;
            }
            let Some(quiz) = self.quiz_for(&session, quizzes).await else {
                continue;
            };
            let elapsed = instruction_end(&session, &quiz).is_some_and(|end| now >= end);
            if elapsed
                && self
                    .transition(&session, SessionEvent::InstructionElapsed, quizzes)
                    .await
            {
                activated += 1;
            }
        }
        Ok(activated)
    }

    /// Expire overdue active sessions and re-arm countdowns lost by a restart.
    async fn recover_active(
        &self,
        now: SystemTime,
        quizzes: &mut HashMap<Uuid, QuizEntity>,
    ) -> Result<usize, ServiceError> {
        let mut expired = 0;
        for session in self.sessions_in(SessionStatus::Active).await? {
            let Some(quiz) = self.quiz_for(&session, quizzes).await else {
                continue;
            };
            let overdue = quiz_end(&session, &quiz).is_some_and(|end| now >= end);
            if !overdue {
                arm_countdown(&self.state, &session, &quiz);
                continue;
            }

            match expire_session(&self.state, session.id).await {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(err) => warn!(
                    session_id = %session.id,
                    error = %err,
                    "failed to expire overdue session"
                ),
            }
        }
        Ok(expired)
    }

    /// Finalize completed sessions left without results by a failure or a restart.
    ///
    /// The work runs on spawned tasks so a slow computation never holds up the tick.
    async fn resume_finalization(&self, now: SystemTime) -> Result<usize, ServiceError> {
        let store = self.state.require_store().await?;
        let pending = self
            .state
            .store_call(store.list_unfinalized_sessions())
            .await?;

        let mut resumed = 0;
        for session in pending
            .iter()
            .filter(|session| needs_finalization(session, now))
        {
            debug!(session_id = %session.id, "resuming session finalization");
            spawn_finalization(self.state.clone(), session.id);
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn sessions_in(&self, status: SessionStatus) -> Result<Vec<SessionEntity>, ServiceError> {
        let store = self.state.require_store().await?;
        self.state
            .store_call(store.list_sessions_by_status(status))
            .await
    }

    async fn quiz_for(
        &self,
        session: &SessionEntity,
        quizzes: &mut HashMap<Uuid, QuizEntity>,
    ) -> Option<QuizEntity> {
        if let Some(quiz) = quizzes.get(&session.quiz_id) {
            return Some(quiz.clone());
        }
        match load_quiz(&self.state, session.quiz_id).await {
            Ok(quiz) => {
                quizzes.insert(quiz.id, quiz.clone());
                Some(quiz)
            }
            Err(err) => {
                warn!(
                    session_id = %session.id,
                    quiz_id = %session.quiz_id,
                    error = %err,
                    "cannot load the quiz of a session"
                );
                None
            }
        }
    }

    /// Apply `event`; `true` only when this tick moved the session.
    async fn transition(
        &self,
        session: &SessionEntity,
        event: SessionEvent,
        quizzes: &mut HashMap<Uuid, QuizEntity>,
    ) -> bool {
        let Some(quiz) = self.quiz_for(session, quizzes).await else {
            return false;
        };
        match apply_event(&self.state, session, &quiz, event).await {
            Ok(outcome) => outcome.is_applied(),
            Err(err) => {
                warn!(session_id = %session.id, ?event, error = %err, "scheduled transition failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::{
            models::{ParticipantStatus, QuestionEntity, SessionParticipantEntity},
            quiz_store::{QuizStore, memory::MemoryQuizStore},
        },
        state::AppState,
    };

    const BASE_SECS: u64 = 1_700_000_000;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(BASE_SECS + secs)
    }

    fn quiz() -> QuizEntity {
        let mut options = IndexMap::new();
        options.insert("a".to_string(), "Yes".to_string());
        options.insert("b".to_string(), "No".to_string());
        QuizEntity {
            id: Uuid::new_v4(),
            title: "Scheduling".into(),
            questions: vec![QuestionEntity {
                id: Uuid::new_v4(),
                prompt: "Ready?".into(),
                options,
                correct_answer: "a".into(),
            }],
            instruction_time_minutes: 5,
            quiz_time_minutes: 10,
            shuffle_questions: false,
            shuffle_options: false,
            created_at: at(0),
        }
    }

    fn session(quiz: &QuizEntity, status: SessionStatus, start_time: SystemTime) -> SessionEntity {
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            name: "Morning round".into(),
            status,
            start_time,
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

    async fn setup(now: SystemTime) -> (SharedState, Arc<ManualClock>, MemoryQuizStore, QuizEntity) {
        let clock = Arc::new(ManualClock::new(now));
        let store = MemoryQuizStore::new();
        let state =
            AppState::with_store(AppConfig::default(), clock.clone(), Arc::new(store.clone()))
                .await;
        let quiz = quiz();
        store.save_quiz(quiz.clone()).await.unwrap();
        (state, clock, store, quiz)
    }

    async fn status_of(store: &MemoryQuizStore, id: Uuid) -> SessionEntity {
        store.find_session(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn starts_sessions_inside_the_acceptance_window() {
        let (state, _clock, store, quiz) = setup(at(3_630)).await;
        let due = session(&quiz, SessionStatus::Scheduled, at(3_600));
        let late = session(&quiz, SessionStatus::Scheduled, at(3_500));
        let future = session(&quiz, SessionStatus::Scheduled, at(4_000));
        let manual = SessionEntity {
            auto_start: false,
            ..session(&quiz, SessionStatus::Scheduled, at(3_600))
        };
        for entity in [&due, &late, &future, &manual] {
            store.save_session(entity.clone()).await.unwrap();
        }

        let report = Scheduler::new(state).tick().await.unwrap();
        assert_eq!(report.started, 1);

        let started = status_of(&store, due.id).await;
        assert_eq!(started.status, SessionStatus::Instruction);
        assert_eq!(started.instruction_start_time, Some(at(3_600)));
        for id in [late.id, future.id, manual.id] {
            assert_eq!(status_of(&store, id).await.status, SessionStatus::Scheduled);
        }
    }

    #[tokio::test]
    async fn activates_sessions_once_instructions_elapse() {
        let (state, clock, store, quiz) = setup(at(3_600)).await;
        let due = session(&quiz, SessionStatus::Scheduled, at(3_600));
        store.save_session(due.clone()).await.unwrap();

        let mut scheduler = Scheduler::new(state);
        scheduler.tick().await.unwrap();

        clock.advance(Duration::from_secs(4 * 60));
        assert_eq!(scheduler.tick().await.unwrap().activated, 0);

        clock.advance(Duration::from_secs(60));
        assert_eq!(scheduler.tick().await.unwrap().activated, 1);

        let active = status_of(&store, due.id).await;
        assert_eq!(active.status, SessionStatus::Active);
        assert_eq!(active.quiz_start_time, Some(at(3_600 + 300)));
    }

    #[tokio::test]
    async fn stale_cleanup_is_throttled() {
        let (state, clock, store, quiz) = setup(at(100_000)).await;
        let stale = session(&quiz, SessionStatus::Scheduled, at(100_000 - 25 * 3_600));
        store.save_session(stale.clone()).await.unwrap();

        let mut scheduler = Scheduler::new(state);
        assert_eq!(scheduler.tick().await.unwrap().cancelled, 1);
        assert_eq!(
            status_of(&store, stale.id).await.status,
            SessionStatus::Cancelled
        );

        let another = session(&quiz, SessionStatus::Scheduled, at(100_000 - 30 * 3_600));
        store.save_session(another.clone()).await.unwrap();
        clock.advance(Duration::from_secs(600));
        assert_eq!(scheduler.tick().await.unwrap().cancelled, 0);

        clock.advance(Duration::from_secs(3_600));
        assert_eq!(scheduler.tick().await.unwrap().cancelled, 1);
    }

    #[tokio::test]
    async fn recovers_active_sessions_past_their_deadline() {
        let (state, _clock, store, quiz) = setup(at(10_000)).await;
        let overdue = SessionEntity {
            instruction_start_time: Some(at(8_000)),
            quiz_start_time: Some(at(8_300)),
            ..session(&quiz, SessionStatus::Active, at(8_000))
        };
        store.save_session(overdue.clone()).await.unwrap();

        let straggler = SessionParticipantEntity {
            status: ParticipantStatus::Started,
            started_quiz_at: Some(at(8_310)),
            ..SessionParticipantEntity::joined(overdue.id, Uuid::new_v4(), at(8_100))
        };
        store.insert_participant(straggler.clone(), None).await.unwrap();

        let report = Scheduler::new(state).tick().await.unwrap();
        assert_eq!(report.expired, 1);

        let closed = status_of(&store, overdue.id).await;
        assert_eq!(closed.status, SessionStatus::Completed);
        let timed_out = store
            .find_participant(overdue.id, straggler.participant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(timed_out.status, ParticipantStatus::Timeout);
        assert_eq!(timed_out.completion_time_seconds, Some(600));
    }

    #[tokio::test]
    async fn running_active_sessions_get_a_countdown() {
        let (state, _clock, store, quiz) = setup(at(8_400)).await;
        let running = SessionEntity {
            instruction_start_time: Some(at(8_000)),
            quiz_start_time: Some(at(8_300)),
            ..session(&quiz, SessionStatus::Active, at(8_000))
        };
        store.save_session(running.clone()).await.unwrap();

        let report = Scheduler::new(state.clone()).tick().await.unwrap();
        assert_eq!(report.expired, 0);
        assert!(state.countdowns().contains_key(&running.id));
    }

    fn config_with_window(window_secs: u64, ceiling_secs: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.scheduler.auto_start_window = Duration::from_secs(window_secs);
        config.scheduler.late_start_ceiling = Duration::from_secs(ceiling_secs);
        config
    }

    async fn started_after(config: AppConfig, past_start: u64) -> bool {
        let store = MemoryQuizStore::new();
        let state = AppState::with_store(
            config,
            Arc::new(ManualClock::new(at(3_600 + past_start))),
            Arc::new(store.clone()),
        )
        .await;
        let quiz = quiz();
        store.save_quiz(quiz.clone()).await.unwrap();
        let due = session(&quiz, SessionStatus::Scheduled, at(3_600));
        store.save_session(due.clone()).await.unwrap();

        Scheduler::new(state).tick().await.unwrap();
        status_of(&store, due.id).await.status == SessionStatus::Instruction
    }

    #[tokio::test]
    async fn acceptance_window_bounds_are_inclusive() {
        assert!(started_after(AppConfig::default(), 0).await);
        assert!(started_after(AppConfig::default(), 60).await);
        assert!(!started_after(AppConfig::default(), 61).await);
    }

    #[tokio::test]
    async fn late_start_ceiling_caps_a_wide_window() {
        let wide = || config_with_window(600, 300);
        assert!(started_after(wide(), 299).await);
        assert!(!started_after(wide(), 300).await);
        assert!(!started_after(wide(), 450).await);
    }

    async fn wait_until_finalized(store: &MemoryQuizStore, id: Uuid) -> SessionEntity {
        timeout(Duration::from_secs(5), async {
            loop {
                let session = status_of(store, id).await;
                if session.prizes_calculated {
                    return session;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("session was never finalized")
    }

    #[tokio::test]
    async fn completed_sessions_without_results_are_finalized() {
        let (state, clock, store, quiz) = setup(at(10_000)).await;
        let completed = |claimed_at| SessionEntity {
            instruction_start_time: Some(at(8_000)),
            quiz_start_time: Some(at(8_300)),
            end_time: Some(at(8_900)),
            finalization_claimed_at: claimed_at,
            ..session(&quiz, SessionStatus::Completed, at(8_000))
        };
        // restarted right after the completing transition
        let orphaned = completed(None);
        // the finalizer died while holding its claim
        let abandoned = completed(Some(at(9_990)));
        for entity in [&orphaned, &abandoned] {
            store.save_session(entity.clone()).await.unwrap();
            let finished = SessionParticipantEntity {
                status: ParticipantStatus::Submitted,
                submitted_at: Some(at(8_500)),
                completion_time_seconds: Some(400),
                ..SessionParticipantEntity::joined(entity.id, Uuid::new_v4(), at(8_100))
            };
            store.insert_participant(finished, None).await.unwrap();
        }

        let mut scheduler = Scheduler::new(state);
        assert_eq!(scheduler.tick().await.unwrap().finalizing, 1);
        wait_until_finalized(&store, orphaned.id).await;
        assert_eq!(store.list_results(orphaned.id).await.unwrap().len(), 1);
        assert!(!status_of(&store, abandoned.id).await.prizes_calculated);

        clock.advance(Duration::from_secs(5 * 60));
        assert_eq!(scheduler.tick().await.unwrap().finalizing, 1);
        let recovered = wait_until_finalized(&store, abandoned.id).await;
        assert_eq!(recovered.finalization_claimed_at, None);
        assert_eq!(store.list_results(abandoned.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn degraded_state_skips_the_tick() {
        let state = AppState::new(
            AppConfig::default(),
            Arc::new(ManualClock::new(at(0))),
        );
        assert!(matches!(
            Scheduler::new(state).tick().await,
            Err(ServiceError::Degraded)
        ));
    }
}
