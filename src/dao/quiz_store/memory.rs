//! In-process [`QuizStore`] used for development runs and tests.
//!
//! All tables live behind a single async mutex, so each conditional update
//! observes and mutates the stored state as one atomic step.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use dashmap::DashSet;
use futures::future::BoxFuture;
use indexmap::IndexMap;
use thiserror::Error;
use tokio::{sync::Mutex, time::sleep};
use uuid::Uuid;

use crate::dao::{
    models::{
        AnswerEntity, ParticipantStatus, PrizeWinnerEntity, QuizEntity, ResultEntity,
        SessionEntity, SessionParticipantEntity, SessionStatus, SessionTransition,
        ShuffledQuestionEntry,
    },
    quiz_store::{QuizStore, Registration},
    storage::{StorageError, StorageResult},
};

#[derive(Debug, Error)]
#[error("injected storage fault")]
struct InjectedFault;

#[derive(Default)]
struct Tables {
    quizzes: HashMap<Uuid, QuizEntity>,
    sessions: HashMap<Uuid, SessionEntity>,
    participants: IndexMap<(Uuid, Uuid), SessionParticipantEntity>,
    answers: IndexMap<(Uuid, Uuid, Uuid), AnswerEntity>,
    results: IndexMap<(Uuid, Uuid), ResultEntity>,
    winners: HashMap<Uuid, Vec<PrizeWinnerEntity>>,
}

#[derive(Default)]
struct Faults {
    offline: AtomicBool,
    latency_ms: AtomicU64,
    failing_participants: DashSet<Uuid>,
}

/// Memory-backed [`QuizStore`] implementation.
#[derive(Clone, Default)]
pub struct MemoryQuizStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryQuizStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.faults.offline.store(offline, Ordering::SeqCst);
    }

    /// Delay every subsequent operation, e.g. to exercise storage timeouts.
    pub fn set_latency(&self, latency: Duration) {
        self.faults
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every status update of one participant fail, leaving the others untouched.
    pub fn fail_participant_updates(&self, participant_id: Uuid) {
        self.faults.failing_participants.insert(participant_id);
    }

    /// Like [`Self::with_tables`], failing when `participant_id` is marked as faulty.
    fn with_participant<T, F>(
        &self,
        participant_id: Uuid,
        op: F,
    ) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StorageResult<T> + Send + 'static,
    {
        if self.faults.failing_participants.contains(&participant_id) {
            return Box::pin(async move {
                Err(StorageError::unavailable(
                    format!("updates of participant `{participant_id}` are failing"),
                    InjectedFault,
                ))
            });
        }
        self.with_tables(op)
    }

    /// Run `op` against the tables after honouring the configured faults.
    fn with_tables<T, F>(&self, op: F) -> BoxFuture<'static, StorageResult<T>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Tables) -> StorageResult<T> + Send + 'static,
    {
        let tables = self.tables.clone();
        let faults = self.faults.clone();
        Box::pin(async move {
            let latency = faults.latency_ms.load(Ordering::SeqCst);
            if latency > 0 {
                sleep(Duration::from_millis(latency)).await;
            }
            if faults.offline.load(Ordering::SeqCst) {
                return Err(StorageError::unavailable(
                    "memory store offline".into(),
                    InjectedFault,
                ));
            }
            let mut guard = tables.lock().await;
            op(&mut *guard)
        })
    }
}

impl QuizStore for MemoryQuizStore {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            tables.quizzes.insert(quiz.id, quiz);
            Ok(())
        })
    }

    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        self.with_tables(move |tables| Ok(tables.quizzes.get(&id).cloned()))
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            tables.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        self.with_tables(move |tables| Ok(tables.sessions.get(&id).cloned()))
    }

    fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.with_tables(move |tables| {
            let mut sessions: Vec<SessionEntity> = tables
                .sessions
                .values()
                .filter(|session| session.status == status)
                .cloned()
                .collect();
            sessions.sort_by_key(|session| session.start_time);
            Ok(sessions)
        })
    }

    fn transition_session(
        &self,
        id: Uuid,
        expected: SessionStatus,
        transition: SessionTransition,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_tables(move |tables| {
            let session = tables
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::missing("session", id))?;
            if session.status != expected {
                return Ok(false);
            }
            transition.apply_to(session);
            Ok(true)
        })
    }

    fn cancel_stale_sessions(
        &self,
        cutoff: SystemTime,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        self.with_tables(move |tables| {
            let mut cancelled = 0;
            for session in tables.sessions.values_mut() {
                if session.status == SessionStatus::Scheduled && session.start_time < cutoff {
                    session.status = SessionStatus::Cancelled;
                    session.updated_at = now;
                    cancelled += 1;
                }
            }
            Ok(cancelled)
        })
    }

    fn list_unfinalized_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        self.with_tables(|tables| {
            let mut sessions: Vec<SessionEntity> = tables
                .sessions
                .values()
                .filter(|session| {
                    session.status == SessionStatus::Completed && !session.prizes_calculated
                })
                .cloned()
                .collect();
            sessions.sort_by_key(|session| session.start_time);
            Ok(sessions)
        })
    }

    fn claim_finalization(
        &self,
        id: Uuid,
        now: SystemTime,
        stale_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_tables(move |tables| {
            let session = tables
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::missing("session", id))?;
            let claimable = !session.prizes_calculated
                && session
                    .finalization_claimed_at
                    .is_none_or(|claimed| claimed < stale_before);
            if !claimable {
                return Ok(false);
            }
            session.finalization_claimed_at = Some(now);
            Ok(true)
        })
    }

    fn release_finalization(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            if let Some(session) = tables.sessions.get_mut(&id) {
                session.finalization_claimed_at = None;
            }
            Ok(())
        })
    }

    fn mark_finalized(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            let session = tables
                .sessions
                .get_mut(&id)
                .ok_or_else(|| StorageError::missing("session", id))?;
            session.prizes_calculated = true;
            session.finalization_claimed_at = None;
            Ok(())
        })
    }

    fn insert_participant(
        &self,
        participant: SessionParticipantEntity,
        capacity: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<Registration>> {
        self.with_tables(move |tables| {
            let key = (participant.session_id, participant.participant_id);
            if tables.participants.contains_key(&key) {
                return Ok(Registration::Existing);
            }
            if let Some(limit) = capacity {
                let registered = tables
                    .participants
                    .keys()
                    .filter(|(session_id, _)| *session_id == participant.session_id)
                    .count();
                if registered >= limit as usize {
                    return Ok(Registration::Full);
                }
            }
            tables.participants.insert(key, participant);
            Ok(Registration::Inserted)
        })
    }

    fn find_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .participants
                .get(&(session_id, participant_id))
                .cloned())
        })
    }

    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionParticipantEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .participants
                .values()
                .filter(|participant| participant.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn mark_participant_started(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_participant(participant_id, move |tables| {
            let participant = tables
                .participants
                .get_mut(&(session_id, participant_id))
                .ok_or_else(|| StorageError::missing("participant", participant_id))?;
            if participant.status != ParticipantStatus::Joined {
                return Ok(false);
            }
            participant.status = ParticipantStatus::Started;
            participant.started_quiz_at = Some(at);
            Ok(true)
        })
    }

    fn store_shuffled_order(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        order: Vec<ShuffledQuestionEntry>,
    ) -> BoxFuture<'static, StorageResult<Vec<ShuffledQuestionEntry>>> {
        self.with_tables(move |tables| {
            let participant = tables
                .participants
                .get_mut(&(session_id, participant_id))
                .ok_or_else(|| StorageError::missing("participant", participant_id))?;
            let stored = participant.shuffled_question_order.get_or_insert(order);
            Ok(stored.clone())
        })
    }

    fn mark_participant_submitted(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>> {
        self.with_participant(participant_id, move |tables| {
            let participant = tables
                .participants
                .get_mut(&(session_id, participant_id))
                .ok_or_else(|| StorageError::missing("participant", participant_id))?;
            if participant.status.is_finished() {
                return Ok(None);
            }
            participant.status = ParticipantStatus::Submitted;
            participant.submitted_at = Some(at);
            participant.completion_time_seconds = Some(completion_time_seconds);
            Ok(Some(participant.clone()))
        })
    }

    fn mark_participant_timed_out(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        self.with_participant(participant_id, move |tables| {
            let participant = tables
                .participants
                .get_mut(&(session_id, participant_id))
                .ok_or_else(|| StorageError::missing("participant", participant_id))?;
            if participant.status != ParticipantStatus::Started {
                return Ok(false);
            }
            participant.status = ParticipantStatus::Timeout;
            participant.submitted_at = Some(at);
            participant.completion_time_seconds = Some(completion_time_seconds);
            Ok(true)
        })
    }

    fn upsert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            let key = (answer.session_id, answer.participant_id, answer.question_id);
            tables.answers.insert(key, answer);
            Ok(())
        })
    }

    fn list_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .answers
                .values()
                .filter(|answer| answer.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn upsert_result(&self, result: ResultEntity) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            let key = (result.session_id, result.participant_id);
            tables.results.insert(key, result);
            Ok(())
        })
    }

    fn list_results(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>> {
        self.with_tables(move |tables| {
            Ok(tables
                .results
                .values()
                .filter(|result| result.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn replace_prize_winners(
        &self,
        session_id: Uuid,
        winners: Vec<PrizeWinnerEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(move |tables| {
            tables.winners.insert(session_id, winners);
            Ok(())
        })
    }

    fn list_prize_winners(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PrizeWinnerEntity>>> {
        self.with_tables(move |tables| {
            let mut winners = tables.winners.get(&session_id).cloned().unwrap_or_default();
            winners.sort_by_key(|winner| winner.position);
            Ok(winners)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(|_| Ok(()))
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        self.with_tables(|_| Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(session_id: Uuid) -> SessionParticipantEntity {
        SessionParticipantEntity::joined(session_id, Uuid::new_v4(), SystemTime::UNIX_EPOCH)
    }

    #[tokio::test]
    async fn participant_insert_is_first_writer_wins() {
        let store = MemoryQuizStore::new();
        let registration = participant(Uuid::new_v4());

        assert_eq!(
            store.insert_participant(registration.clone(), None).await.unwrap(),
            Registration::Inserted
        );
        assert_eq!(
            store.insert_participant(registration, None).await.unwrap(),
            Registration::Existing
        );
    }

    #[tokio::test]
    async fn concurrent_registrations_respect_capacity() {
        let store = MemoryQuizStore::new();
        store.set_latency(Duration::from_millis(10));
        let session_id = Uuid::new_v4();

        let (first, second) = tokio::join!(
            store.insert_participant(participant(session_id), Some(1)),
            store.insert_participant(participant(session_id), Some(1)),
        );
        let mut outcomes = vec![first.unwrap(), second.unwrap()];
        outcomes.sort_by_key(|outcome| *outcome != Registration::Inserted);
        assert_eq!(outcomes, vec![Registration::Inserted, Registration::Full]);
        assert_eq!(store.list_participants(session_id).await.unwrap().len(), 1);
    }

    fn completed_session() -> SessionEntity {
        let at = SystemTime::UNIX_EPOCH;
        SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: Uuid::new_v4(),
            name: "Closing round".into(),
            status: SessionStatus::Completed,
            start_time: at,
            instruction_start_time: Some(at),
            quiz_start_time: Some(at),
            end_time: Some(at),
            auto_start: true,
            max_participants: None,
            prizes_calculated: false,
            finalization_claimed_at: None,
            created_at: at,
            updated_at: at,
        }
    }

    #[tokio::test]
    async fn finalization_claim_is_exclusive_until_stale() {
        let store = MemoryQuizStore::new();
        let session = completed_session();
        store.save_session(session.clone()).await.unwrap();
        let at = |secs| SystemTime::UNIX_EPOCH + Duration::from_secs(secs);

        assert!(store.claim_finalization(session.id, at(100), at(0)).await.unwrap());
        assert!(!store.claim_finalization(session.id, at(110), at(0)).await.unwrap());
        // the first holder never finished; its claim is older than the cutoff
        assert!(store.claim_finalization(session.id, at(500), at(200)).await.unwrap());

        store.mark_finalized(session.id).await.unwrap();
        let stored = store.find_session(session.id).await.unwrap().unwrap();
        assert!(stored.prizes_calculated);
        assert_eq!(stored.finalization_claimed_at, None);
        assert!(!store.claim_finalization(session.id, at(900), at(900)).await.unwrap());
        assert!(store.list_unfinalized_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn faulty_participant_does_not_affect_others() {
        let store = MemoryQuizStore::new();
        let session_id = Uuid::new_v4();
        let (healthy, faulty) = (participant(session_id), participant(session_id));
        for registration in [&healthy, &faulty] {
            store.insert_participant(registration.clone(), None).await.unwrap();
        }
        store.fail_participant_updates(faulty.participant_id);
        let at = SystemTime::UNIX_EPOCH;

        assert!(
            store
                .mark_participant_started(session_id, healthy.participant_id, at)
                .await
                .unwrap()
        );
        assert!(
            store
                .mark_participant_started(session_id, faulty.participant_id, at)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn shuffled_order_is_never_replaced() {
        let store = MemoryQuizStore::new();
        let registration = participant(Uuid::new_v4());
        let (session_id, participant_id) = (registration.session_id, registration.participant_id);
        store.insert_participant(registration, None).await.unwrap();

        let first = vec![ShuffledQuestionEntry {
            question_id: Uuid::new_v4(),
            original_order: 0,
            shuffled_order: 0,
            option_mapping: None,
        }];
        let second = vec![ShuffledQuestionEntry {
            question_id: Uuid::new_v4(),
            original_order: 0,
            shuffled_order: 0,
            option_mapping: None,
        }];

        let stored = store
            .store_shuffled_order(session_id, participant_id, first.clone())
            .await
            .unwrap();
        assert_eq!(stored, first);
        let stored = store
            .store_shuffled_order(session_id, participant_id, second)
            .await
            .unwrap();
        assert_eq!(stored, first);
    }

    #[tokio::test]
    async fn submitted_participant_cannot_time_out() {
        let store = MemoryQuizStore::new();
        let registration = participant(Uuid::new_v4());
        let (session_id, participant_id) = (registration.session_id, registration.participant_id);
        store.insert_participant(registration, None).await.unwrap();
        let at = SystemTime::UNIX_EPOCH;

        assert!(
            store
                .mark_participant_started(session_id, participant_id, at)
                .await
                .unwrap()
        );
        assert!(
            store
                .mark_participant_submitted(session_id, participant_id, at, 10)
                .await
                .unwrap()
                .is_some()
        );
        assert!(
            !store
                .mark_participant_timed_out(session_id, participant_id, at, 900)
                .await
                .unwrap()
        );
        assert!(
            store
                .mark_participant_submitted(session_id, participant_id, at, 20)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = MemoryQuizStore::new();
        store.set_offline(true);
        let err = store.find_session(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
