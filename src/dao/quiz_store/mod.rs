pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use crate::dao::models::{
    AnswerEntity, PrizeWinnerEntity, QuizEntity, ResultEntity, SessionEntity,
    SessionParticipantEntity, SessionStatus, SessionTransition, ShuffledQuestionEntry,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Outcome of a capacity-checked registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// The participant was added.
    Inserted,
    /// The participant was registered already; nothing changed.
    Existing,
    /// The session holds its maximum number of participants.
    Full,
}

/// Abstraction over the persistence layer for sessions, participants, answers and rankings.
///
/// Every mutating operation that races with other actors is conditional: it
/// only applies when the stored record is still in the expected state and
/// reports whether it did. A `false` means someone else got there first.
pub trait QuizStore: Send + Sync {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>>;

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// `UPDATE session SET .. WHERE id = $id AND status = $expected`.
    fn transition_session(
        &self,
        id: Uuid,
        expected: SessionStatus,
        transition: SessionTransition,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Cancel every `scheduled` session whose start time is older than `cutoff`.
    fn cancel_stale_sessions(
        &self,
        cutoff: SystemTime,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<u64>>;
    /// Completed sessions whose results are not stored yet.
    fn list_unfinalized_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Claim the finalization of a session whose results are not stored yet.
    ///
    /// Succeeds when nobody holds the claim, or when its holder took it before
    /// `stale_before` and never finished. `false` otherwise.
    fn claim_finalization(
        &self,
        id: Uuid,
        now: SystemTime,
        stale_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Give a claimed finalization back after a failure so it can be retried.
    fn release_finalization(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Set `prizes_calculated` once results and prizes are stored, clearing any claim.
    fn mark_finalized(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>>;

    /// Insert a registration unless one exists or the session already holds `capacity` participants.
    ///
    /// The capacity check and the insert form one atomic step.
    fn insert_participant(
        &self,
        participant: SessionParticipantEntity,
        capacity: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<Registration>>;
    fn find_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>>;
    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionParticipantEntity>>>;
    /// `joined -> started`; `false` when the participant is past `joined`.
    fn mark_participant_started(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Store `order` unless an ordering already exists, returning whichever ordering is stored.
    fn store_shuffled_order(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        order: Vec<ShuffledQuestionEntry>,
    ) -> BoxFuture<'static, StorageResult<Vec<ShuffledQuestionEntry>>>;
    /// `joined|started -> submitted`, returning the updated record when this call won.
    fn mark_participant_submitted(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>>;
    /// `started -> timeout`; `false` when the participant already finished.
    fn mark_participant_timed_out(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Insert or overwrite the answer keyed by (session, participant, question).
    fn upsert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_answers(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;

    /// Insert or overwrite the result keyed by (session, participant).
    fn upsert_result(&self, result: ResultEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_results(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>>;
    /// Clear the session's winners and insert `winners` as one unit.
    fn replace_prize_winners(
        &self,
        session_id: Uuid,
        winners: Vec<PrizeWinnerEntity>,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn list_prize_winners(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PrizeWinnerEntity>>>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
