use std::time::SystemTime;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Collection,
    bson::{Bson, DateTime, Document, doc},
    options::ReturnDocument,
};
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

use super::{
    MongoManager,
    documents::{
        AnswerDocument, ParticipantDocument, PrizeBoardDocument, QuizDocument, ResultDocument,
        SessionDocument, ShuffledEntryDocument,
    },
    error::{MongoDaoError, Result, is_duplicate_key},
    manager::{ANSWERS, PARTICIPANTS, PRIZE_BOARDS, QUIZZES, RESULTS, SESSIONS},
};

/// MongoDB-backed [`QuizStore`] implementation.
#[derive(Clone)]
pub struct MongoQuizStore {
    mongo: MongoManager,
}

fn by_id(id: Uuid) -> Document {
    doc! {"_id": id.to_string()}
}

fn participant_key(session_id: Uuid, participant_id: Uuid) -> Document {
    doc! {
        "session_id": session_id.to_string(),
        "participant_id": participant_id.to_string(),
    }
}

fn by_session(session_id: Uuid) -> Document {
    doc! {"session_id": session_id.to_string()}
}

impl MongoQuizStore {
    pub fn new(mongo: MongoManager) -> Self {
        Self { mongo }
    }

    async fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.mongo.database().await.collection::<T>(name)
    }

    async fn save_quiz(&self, quiz: QuizEntity) -> Result<()> {
        let id = quiz.id;
        let document: QuizDocument = quiz.into();
        self.collection::<QuizDocument>(QUIZZES)
            .await
            .replace_one(by_id(id), &document)
            .upsert(true)
            .await
            .map_err(MongoDaoError::record("save", QUIZZES, id))?;
        Ok(())
    }

    async fn find_quiz(&self, id: Uuid) -> Result<Option<QuizEntity>> {
        self.collection::<QuizDocument>(QUIZZES)
            .await
            .find_one(by_id(id))
            .await
            .map_err(MongoDaoError::record("load", QUIZZES, id))?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn save_session(&self, session: SessionEntity) -> Result<()> {
        let id = session.id;
        let document: SessionDocument = session.into();
        self.collection::<SessionDocument>(SESSIONS)
            .await
            .replace_one(by_id(id), &document)
            .upsert(true)
            .await
            .map_err(MongoDaoError::record("save", SESSIONS, id))?;
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> Result<Option<SessionEntity>> {
        self.collection::<SessionDocument>(SESSIONS)
            .await
            .find_one(by_id(id))
            .await
            .map_err(MongoDaoError::record("load", SESSIONS, id))?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_sessions_by_status(&self, status: SessionStatus) -> Result<Vec<SessionEntity>> {
        let documents: Vec<SessionDocument> = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .find(doc! {"status": status.as_str()})
            .sort(doc! {"start_time": 1})
            .await
            .map_err(MongoDaoError::list(SESSIONS, status.as_str()))?
            .try_collect()
            .await
            .map_err(MongoDaoError::list(SESSIONS, status.as_str()))?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn transition_session(
        &self,
        id: Uuid,
        expected: SessionStatus,
        transition: SessionTransition,
    ) -> Result<bool> {
        let mut set = doc! {
            "status": transition.status.as_str(),
            "updated_at": DateTime::from_system_time(transition.updated_at),
        };
        if let Some(at) = transition.instruction_start_time {
            set.insert("instruction_start_time", DateTime::from_system_time(at));
        }
        if let Some(at) = transition.quiz_start_time {
            set.insert("quiz_start_time", DateTime::from_system_time(at));
        }
        if let Some(at) = transition.end_time {
            set.insert("end_time", DateTime::from_system_time(at));
        }

        let outcome = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .update_one(
                doc! {"_id": id.to_string(), "status": expected.as_str()},
                doc! {"$set": set},
            )
            .await
            .map_err(MongoDaoError::record("transition", SESSIONS, id))?;
        Ok(outcome.modified_count == 1)
    }

    async fn cancel_stale_sessions(&self, cutoff: SystemTime, now: SystemTime) -> Result<u64> {
        let outcome = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .update_many(
                doc! {
                    "status": SessionStatus::Scheduled.as_str(),
                    "start_time": {"$lt": DateTime::from_system_time(cutoff)},
                },
                doc! {"$set": {
                    "status": SessionStatus::Cancelled.as_str(),
                    "updated_at": DateTime::from_system_time(now),
                }},
            )
            .await
            .map_err(MongoDaoError::list(SESSIONS, "stale cleanup"))?;
        Ok(outcome.modified_count)
    }

    async fn list_unfinalized_sessions(&self) -> Result<Vec<SessionEntity>> {
        let documents: Vec<SessionDocument> = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .find(doc! {
                "status": SessionStatus::Completed.as_str(),
                "prizes_calculated": {"$ne": true},
            })
            .sort(doc! {"start_time": 1})
            .await
            .map_err(MongoDaoError::list(SESSIONS, "pending finalization"))?
            .try_collect()
            .await
            .map_err(MongoDaoError::list(SESSIONS, "pending finalization"))?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_finalization(
        &self,
        id: Uuid,
        now: SystemTime,
        stale_before: SystemTime,
    ) -> Result<bool> {
        let outcome = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .update_one(
                doc! {
                    "_id": id.to_string(),
                    "prizes_calculated": {"$ne": true},
                    "$or": [
                        {"finalization_claimed_at": Bson::Null},
                        {"finalization_claimed_at": {"$lt": DateTime::from_system_time(stale_before)}},
                    ],
                },
                doc! {"$set": {"finalization_claimed_at": DateTime::from_system_time(now)}},
            )
            .await
            .map_err(MongoDaoError::record("claim", SESSIONS, id))?;
        Ok(outcome.modified_count == 1)
    }

    async fn update_session_flags(&self, id: Uuid, update: Document) -> Result<()> {
        self.collection::<SessionDocument>(SESSIONS)
            .await
            .update_one(by_id(id), update)
            .await
            .map_err(MongoDaoError::record("flag", SESSIONS, id))?;
        Ok(())
    }

    /// Take a seat on the session's participant counter, unless `capacity` is reached.
    async fn reserve_seat(&self, session_id: Uuid, capacity: Option<u32>) -> Result<bool> {
        let mut filter = by_id(session_id);
        if let Some(limit) = capacity {
            filter.insert(
                "$or",
                vec![
                    doc! {"participant_count": {"$lt": i64::from(limit)}},
                    doc! {"participant_count": {"$exists": false}},
                ],
            );
        }
        let outcome = self
            .collection::<SessionDocument>(SESSIONS)
            .await
            .update_one(filter, doc! {"$inc": {"participant_count": 1}})
            .await
            .map_err(MongoDaoError::record("reserve seat", SESSIONS, session_id))?;
        Ok(outcome.modified_count == 1)
    }

    async fn release_seat(&self, session_id: Uuid) -> Result<()> {
        self.update_session_flags(session_id, doc! {"$inc": {"participant_count": -1}})
            .await
    }

    async fn insert_participant(
        &self,
        participant: SessionParticipantEntity,
        capacity: Option<u32>,
    ) -> Result<Registration> {
        let (session_id, id) = (participant.session_id, participant.participant_id);
        if self.find_participant(session_id, id).await?.is_some() {
            return Ok(Registration::Existing);
        }
        if !self.reserve_seat(session_id, capacity).await? {
            return Ok(Registration::Full);
        }

        let document: ParticipantDocument = participant.into();
        let inserted = self
            .collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .insert_one(&document)
            .await;
        match inserted {
            Ok(_) => Ok(Registration::Inserted),
            Err(err) => {
                self.release_seat(session_id).await?;
                if is_duplicate_key(&err) {
                    Ok(Registration::Existing)
                } else {
                    Err(MongoDaoError::record("insert", PARTICIPANTS, id)(err))
                }
            }
        }
    }

    async fn find_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> Result<Option<SessionParticipantEntity>> {
        self.collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .find_one(participant_key(session_id, participant_id))
            .await
            .map_err(MongoDaoError::record("load", PARTICIPANTS, participant_id))?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn list_participants(&self, session_id: Uuid) -> Result<Vec<SessionParticipantEntity>> {
        let documents: Vec<ParticipantDocument> = self
            .collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .find(by_session(session_id))
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(MongoDaoError::list(PARTICIPANTS, session_id))?
            .try_collect()
            .await
            .map_err(MongoDaoError::list(PARTICIPANTS, session_id))?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn conditional_participant_update(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        status_filter: Bson,
        set: Document,
    ) -> Result<bool> {
        let mut filter = participant_key(session_id, participant_id);
        filter.insert("status", status_filter);
        let outcome = self
            .collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .update_one(filter, doc! {"$set": set})
            .await
            .map_err(MongoDaoError::record("update", PARTICIPANTS, participant_id))?;
        Ok(outcome.modified_count == 1)
    }

    async fn store_shuffled_order(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        order: Vec<ShuffledQuestionEntry>,
    ) -> Result<Vec<ShuffledQuestionEntry>> {
        let rendered: Vec<Bson> = order
            .into_iter()
            .map(|entry| ShuffledEntryDocument::from(entry).to_bson())
            .collect();

        let mut filter = participant_key(session_id, participant_id);
        filter.insert("shuffled_question_order", Bson::Null);
        self.collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .update_one(
                filter,
                doc! {"$set": {"shuffled_question_order": rendered}},
            )
            .await
            .map_err(MongoDaoError::record("shuffle", PARTICIPANTS, participant_id))?;

        let stored = self
            .find_participant(session_id, participant_id)
            .await?
            .and_then(|participant| participant.shuffled_question_order)
            .ok_or(MongoDaoError::Malformed {
                collection: PARTICIPANTS,
                field: "shuffled_question_order",
            })?;
        Ok(stored)
    }

    async fn mark_participant_submitted(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> Result<Option<SessionParticipantEntity>> {
        let mut filter = participant_key(session_id, participant_id);
        filter.insert(
            "status",
            doc! {"$in": [ParticipantStatus::Joined.as_str(), ParticipantStatus::Started.as_str()]},
        );
        self.collection::<ParticipantDocument>(PARTICIPANTS)
            .await
            .find_one_and_update(
                filter,
                doc! {"$set": {
                    "status": ParticipantStatus::Submitted.as_str(),
                    "submitted_at": DateTime::from_system_time(at),
                    "completion_time_seconds": i64::from(completion_time_seconds),
                }},
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(MongoDaoError::record("submit", PARTICIPANTS, participant_id))?
            .map(TryInto::try_into)
            .transpose()
    }

    async fn upsert_answer(&self, answer: AnswerEntity) -> Result<()> {
        let filter = doc! {
            "session_id": answer.session_id.to_string(),
            "participant_id": answer.participant_id.to_string(),
            "question_id": answer.question_id.to_string(),
        };
        let id = answer.question_id;
        let document: AnswerDocument = answer.into();
        self.collection::<AnswerDocument>(ANSWERS)
            .await
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(MongoDaoError::record("upsert", ANSWERS, id))?;
        Ok(())
    }

    async fn list_answers(&self, session_id: Uuid) -> Result<Vec<AnswerEntity>> {
        let documents: Vec<AnswerDocument> = self
            .collection::<AnswerDocument>(ANSWERS)
            .await
            .find(by_session(session_id))
            .await
            .map_err(MongoDaoError::list(ANSWERS, session_id))?
            .try_collect()
            .await
            .map_err(MongoDaoError::list(ANSWERS, session_id))?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn upsert_result(&self, result: ResultEntity) -> Result<()> {
        let filter = participant_key(result.session_id, result.participant_id);
        let id = result.participant_id;
        let document: ResultDocument = result.into();
        self.collection::<ResultDocument>(RESULTS)
            .await
            .replace_one(filter, &document)
            .upsert(true)
            .await
            .map_err(MongoDaoError::record("upsert", RESULTS, id))?;
        Ok(())
    }

    async fn list_results(&self, session_id: Uuid) -> Result<Vec<ResultEntity>> {
        let documents: Vec<ResultDocument> = self
            .collection::<ResultDocument>(RESULTS)
            .await
            .find(by_session(session_id))
            .await
            .map_err(MongoDaoError::list(RESULTS, session_id))?
            .try_collect()
            .await
            .map_err(MongoDaoError::list(RESULTS, session_id))?;

        documents.into_iter().map(TryInto::try_into).collect()
    }

    async fn replace_prize_winners(
        &self,
        session_id: Uuid,
        winners: Vec<PrizeWinnerEntity>,
    ) -> Result<()> {
        let board = PrizeBoardDocument::new(session_id, winners);
        self.collection::<PrizeBoardDocument>(PRIZE_BOARDS)
            .await
            .replace_one(by_id(session_id), &board)
            .upsert(true)
            .await
            .map_err(MongoDaoError::record("replace", PRIZE_BOARDS, session_id))?;
        Ok(())
    }

    async fn list_prize_winners(&self, session_id: Uuid) -> Result<Vec<PrizeWinnerEntity>> {
        let board = self
            .collection::<PrizeBoardDocument>(PRIZE_BOARDS)
            .await
            .find_one(by_id(session_id))
            .await
            .map_err(MongoDaoError::record("load", PRIZE_BOARDS, session_id))?;

        let mut winners = match board {
            Some(board) => board.into_entities()?,
            None => Vec::new(),
        };
        winners.sort_by_key(|winner| winner.position);
        Ok(winners)
    }
}

impl QuizStore for MongoQuizStore {
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_quiz(quiz).await.map_err(Into::into) })
    }

    fn find_quiz(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_quiz(id).await.map_err(Into::into) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn find_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_session(id).await.map_err(Into::into) })
    }

    fn list_sessions_by_status(
        &self,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_sessions_by_status(status).await.map_err(Into::into) })
    }

    fn transition_session(
        &self,
        id: Uuid,
        expected: SessionStatus,
        transition: SessionTransition,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .transition_session(id, expected, transition)
                .await
                .map_err(Into::into)
        })
    }

    fn cancel_stale_sessions(
        &self,
        cutoff: SystemTime,
        now: SystemTime,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move { store.cancel_stale_sessions(cutoff, now).await.map_err(Into::into) })
    }

    fn list_unfinalized_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_unfinalized_sessions().await.map_err(Into::into) })
    }

    fn claim_finalization(
        &self,
        id: Uuid,
        now: SystemTime,
        stale_before: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .claim_finalization(id, now, stale_before)
                .await
                .map_err(Into::into)
        })
    }

    fn release_finalization(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_flags(id, doc! {"$set": {"finalization_claimed_at": Bson::Null}})
                .await
                .map_err(Into::into)
        })
    }

    fn mark_finalized(&self, id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_flags(
                    id,
                    doc! {"$set": {
                        "prizes_calculated": true,
                        "finalization_claimed_at": Bson::Null,
                    }},
                )
                .await
                .map_err(Into::into)
        })
    }

    fn insert_participant(
        &self,
        participant: SessionParticipantEntity,
        capacity: Option<u32>,
    ) -> BoxFuture<'static, StorageResult<Registration>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .insert_participant(participant, capacity)
                .await
                .map_err(Into::into)
        })
    }

    fn find_participant(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_participant(session_id, participant_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_participants(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_participants(session_id).await.map_err(Into::into) })
    }

    fn mark_participant_started(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .conditional_participant_update(
                    session_id,
                    participant_id,
                    Bson::String(ParticipantStatus::Joined.as_str().into()),
                    doc! {
                        "status": ParticipantStatus::Started.as_str(),
                        "started_quiz_at": DateTime::from_system_time(at),
                    },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn store_shuffled_order(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        order: Vec<ShuffledQuestionEntry>,
    ) -> BoxFuture<'static, StorageResult<Vec<ShuffledQuestionEntry>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .store_shuffled_order(session_id, participant_id, order)
                .await
                .map_err(Into::into)
        })
    }

    fn mark_participant_submitted(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<Option<SessionParticipantEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .mark_participant_submitted(session_id, participant_id, at, completion_time_seconds)
                .await
                .map_err(Into::into)
        })
    }

    fn mark_participant_timed_out(
        &self,
        session_id: Uuid,
        participant_id: Uuid,
        at: SystemTime,
        completion_time_seconds: u32,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .conditional_participant_update(
                    session_id,
                    participant_id,
                    Bson::String(ParticipantStatus::Started.as_str().into()),
                    doc! {
                        "status": ParticipantStatus::Timeout.as_str(),
                        "submitted_at": DateTime::from_system_time(at),
                        "completion_time_seconds": i64::from(completion_time_seconds),
                    },
                )
                .await
                .map_err(Into::into)
        })
    }

    fn upsert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_answer(answer).await.map_err(Into::into) })
    }

    fn list_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_answers(session_id).await.map_err(Into::into) })
    }

    fn upsert_result(&self, result: ResultEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.upsert_result(result).await.map_err(Into::into) })
    }

    fn list_results(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<ResultEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_results(session_id).await.map_err(Into::into) })
    }

    fn replace_prize_winners(
        &self,
        session_id: Uuid,
        winners: Vec<PrizeWinnerEntity>,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .replace_prize_winners(session_id, winners)
                .await
                .map_err(Into::into)
        })
    }

    fn list_prize_winners(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<PrizeWinnerEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_prize_winners(session_id).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mongo = self.mongo.clone();
        Box::pin(async move { mongo.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mongo = self.mongo.clone();
        Box::pin(async move { mongo.reconnect().await.map_err(StorageError::from) })
    }
}
