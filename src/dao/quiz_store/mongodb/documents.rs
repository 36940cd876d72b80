//! BSON document shapes persisted in MongoDB and their entity conversions.
//!
//! Identifiers are stored as hyphenated strings and timestamps as BSON
//! datetimes so range filters (`start_time < cutoff`) run server-side.

use indexmap::IndexMap;
use mongodb::bson::{Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, OptionMapping, ParticipantStatus, PerformanceCategory, PrizeWinnerEntity,
    QuestionEntity, QuizEntity, ResultEntity, SessionEntity, SessionParticipantEntity,
    SessionStatus, ShuffledQuestionEntry,
};

use super::error::MongoDaoError;

fn parse_id(
    collection: &'static str,
    field: &'static str,
    raw: &str,
) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|_| MongoDaoError::Malformed { collection, field })
}

fn opt_time(value: Option<DateTime>) -> Option<std::time::SystemTime> {
    value.map(DateTime::to_system_time)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDocument {
    id: String,
    prompt: String,
    options: IndexMap<String, String>,
    correct_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDocument {
    #[serde(rename = "_id")]
    id: String,
    title: String,
    questions: Vec<QuestionDocument>,
    instruction_time_minutes: u32,
    quiz_time_minutes: u32,
    shuffle_questions: bool,
    shuffle_options: bool,
    created_at: DateTime,
}

impl From<QuizEntity> for QuizDocument {
    fn from(value: QuizEntity) -> Self {
        Self {
            id: value.id.to_string(),
            title: value.title,
            questions: value
                .questions
                .into_iter()
                .map(|question| QuestionDocument {
                    id: question.id.to_string(),
                    prompt: question.prompt,
                    options: question.options,
                    correct_answer: question.correct_answer,
                })
                .collect(),
            instruction_time_minutes: value.instruction_time_minutes,
            quiz_time_minutes: value.quiz_time_minutes,
            shuffle_questions: value.shuffle_questions,
            shuffle_options: value.shuffle_options,
            created_at: DateTime::from_system_time(value.created_at),
        }
    }
}

impl TryFrom<QuizDocument> for QuizEntity {
    type Error = MongoDaoError;

    fn try_from(value: QuizDocument) -> Result<Self, Self::Error> {
        let questions = value
            .questions
            .into_iter()
            .map(|question| {
                Ok(QuestionEntity {
                    id: parse_id("quizzes", "questions.id", &question.id)?,
                    prompt: question.prompt,
                    options: question.options,
                    correct_answer: question.correct_answer,
                })
            })
            .collect::<Result<Vec<_>, MongoDaoError>>()?;

        Ok(Self {
            id: parse_id("quizzes", "_id", &value.id)?,
            title: value.title,
            questions,
            instruction_time_minutes: value.instruction_time_minutes,
            quiz_time_minutes: value.quiz_time_minutes,
            shuffle_questions: value.shuffle_questions,
            shuffle_options: value.shuffle_options,
            created_at: value.created_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDocument {
    #[serde(rename = "_id")]
    id: String,
    quiz_id: String,
    name: String,
    status: SessionStatus,
    start_time: DateTime,
    instruction_start_time: Option<DateTime>,
    quiz_start_time: Option<DateTime>,
    end_time: Option<DateTime>,
    auto_start: bool,
    max_participants: Option<u32>,
    #[serde(default)]
    prizes_calculated: bool,
    #[serde(default)]
    finalization_claimed_at: Option<DateTime>,
    /// Seats taken, maintained by the registration path only.
    #[serde(default)]
    participant_count: u32,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<SessionEntity> for SessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            quiz_id: value.quiz_id.to_string(),
            name: value.name,
            status: value.status,
            start_time: DateTime::from_system_time(value.start_time),
            instruction_start_time: value.instruction_start_time.map(DateTime::from_system_time),
            quiz_start_time: value.quiz_start_time.map(DateTime::from_system_time),
            end_time: value.end_time.map(DateTime::from_system_time),
            auto_start: value.auto_start,
            max_participants: value.max_participants,
            prizes_calculated: value.prizes_calculated,
            finalization_claimed_at: value.finalization_claimed_at.map(DateTime::from_system_time),
            participant_count: 0,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
        }
    }
}

impl TryFrom<SessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: SessionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id("sessions", "_id", &value.id)?,
            quiz_id: parse_id("sessions", "quiz_id", &value.quiz_id)?,
            name: value.name,
            status: value.status,
            start_time: value.start_time.to_system_time(),
            instruction_start_time: opt_time(value.instruction_start_time),
            quiz_start_time: opt_time(value.quiz_start_time),
            end_time: opt_time(value.end_time),
            auto_start: value.auto_start,
            max_participants: value.max_participants,
            prizes_calculated: value.prizes_calculated,
            finalization_claimed_at: opt_time(value.finalization_claimed_at),
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuffledEntryDocument {
    question_id: String,
    original_order: u32,
    shuffled_order: u32,
    option_mapping: Option<OptionMapping>,
}

impl ShuffledEntryDocument {
    /// Manual BSON rendering used inside `$set` updates.
    pub fn to_bson(&self) -> Bson {
        let mapping = match &self.option_mapping {
            Some(mapping) => {
                let forward: Document = mapping
                    .canonical_to_displayed
                    .iter()
                    .map(|(key, value)| (key.clone(), Bson::String(value.clone())))
                    .collect();
                let inverse: Document = mapping
                    .displayed_to_canonical
                    .iter()
                    .map(|(key, value)| (key.clone(), Bson::String(value.clone())))
                    .collect();
                Bson::Document(doc! {
                    "canonical_to_displayed": forward,
                    "displayed_to_canonical": inverse,
                })
            }
            None => Bson::Null,
        };
        Bson::Document(doc! {
            "question_id": self.question_id.clone(),
            "original_order": i64::from(self.original_order),
            "shuffled_order": i64::from(self.shuffled_order),
            "option_mapping": mapping,
        })
    }
}

impl From<ShuffledQuestionEntry> for ShuffledEntryDocument {
    fn from(value: ShuffledQuestionEntry) -> Self {
        Self {
            question_id: value.question_id.to_string(),
            original_order: value.original_order,
            shuffled_order: value.shuffled_order,
            option_mapping: value.option_mapping,
        }
    }
}

impl TryFrom<ShuffledEntryDocument> for ShuffledQuestionEntry {
    type Error = MongoDaoError;

    fn try_from(value: ShuffledEntryDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            question_id: parse_id(
                "session_participants",
                "shuffled_question_order.question_id",
                &value.question_id,
            )?,
            original_order: value.original_order,
            shuffled_order: value.shuffled_order,
            option_mapping: value.option_mapping,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantDocument {
    session_id: String,
    participant_id: String,
    status: ParticipantStatus,
    joined_at: DateTime,
    started_quiz_at: Option<DateTime>,
    submitted_at: Option<DateTime>,
    completion_time_seconds: Option<u32>,
    shuffled_question_order: Option<Vec<ShuffledEntryDocument>>,
}

impl From<SessionParticipantEntity> for ParticipantDocument {
    fn from(value: SessionParticipantEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            status: value.status,
            joined_at: DateTime::from_system_time(value.joined_at),
            started_quiz_at: value.started_quiz_at.map(DateTime::from_system_time),
            submitted_at: value.submitted_at.map(DateTime::from_system_time),
            completion_time_seconds: value.completion_time_seconds,
            shuffled_question_order: value
                .shuffled_question_order
                .map(|order| order.into_iter().map(Into::into).collect()),
        }
    }
}

impl TryFrom<ParticipantDocument> for SessionParticipantEntity {
    type Error = MongoDaoError;

    fn try_from(value: ParticipantDocument) -> Result<Self, Self::Error> {
        let shuffled_question_order = value
            .shuffled_question_order
            .map(|order| {
                order
                    .into_iter()
                    .map(TryInto::try_into)
                    .collect::<Result<Vec<ShuffledQuestionEntry>, _>>()
            })
            .transpose()?;

        Ok(Self {
            session_id: parse_id("session_participants", "session_id", &value.session_id)?,
            participant_id: parse_id(
                "session_participants",
                "participant_id",
                &value.participant_id,
            )?,
            status: value.status,
            joined_at: value.joined_at.to_system_time(),
            started_quiz_at: opt_time(value.started_quiz_at),
            submitted_at: opt_time(value.submitted_at),
            completion_time_seconds: value.completion_time_seconds,
            shuffled_question_order,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerDocument {
    session_id: String,
    participant_id: String,
    question_id: String,
    selected_answer: String,
    is_correct: bool,
    time_taken_seconds: u32,
    answered_at: DateTime,
}

impl From<AnswerEntity> for AnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            question_id: value.question_id.to_string(),
            selected_answer: value.selected_answer,
            is_correct: value.is_correct,
            time_taken_seconds: value.time_taken_seconds,
            answered_at: DateTime::from_system_time(value.answered_at),
        }
    }
}

impl TryFrom<AnswerDocument> for AnswerEntity {
    type Error = MongoDaoError;

    fn try_from(value: AnswerDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            session_id: parse_id("answers", "session_id", &value.session_id)?,
            participant_id: parse_id("answers", "participant_id", &value.participant_id)?,
            question_id: parse_id("answers", "question_id", &value.question_id)?,
            selected_answer: value.selected_answer,
            is_correct: value.is_correct,
            time_taken_seconds: value.time_taken_seconds,
            answered_at: value.answered_at.to_system_time(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultDocument {
    session_id: String,
    participant_id: String,
    total_questions: u32,
    correct_answers: u32,
    incorrect_answers: u32,
    unanswered: u32,
    total_score: u32,
    percentage_score: u32,
    completion_time_seconds: u32,
    performance_category: PerformanceCategory,
}

impl From<ResultEntity> for ResultDocument {
    fn from(value: ResultEntity) -> Self {
        Self {
            session_id: value.session_id.to_string(),
            participant_id: value.participant_id.to_string(),
            total_questions: value.total_questions,
            correct_answers: value.correct_answers,
            incorrect_answers: value.incorrect_answers,
            unanswered: value.unanswered,
            total_score: value.total_score,
            percentage_score: value.percentage_score,
            completion_time_seconds: value.completion_time_seconds,
            performance_category: value.performance_category,
        }
    }
}

impl TryFrom<ResultDocument> for ResultEntity {
    type Error = MongoDaoError;

    fn try_from(value: ResultDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            session_id: parse_id("results", "session_id", &value.session_id)?,
            participant_id: parse_id("results", "participant_id", &value.participant_id)?,
            total_questions: value.total_questions,
            correct_answers: value.correct_answers,
            incorrect_answers: value.incorrect_answers,
            unanswered: value.unanswered,
            total_score: value.total_score,
            percentage_score: value.percentage_score,
            completion_time_seconds: value.completion_time_seconds,
            performance_category: value.performance_category,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeWinnerDocument {
    position: u8,
    participant_id: String,
    score: u32,
    completion_time_seconds: u32,
}

/// All winners of one session kept in a single document so replacing them is atomic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrizeBoardDocument {
    #[serde(rename = "_id")]
    pub session_id: String,
    pub winners: Vec<PrizeWinnerDocument>,
}

impl PrizeBoardDocument {
    pub fn new(session_id: Uuid, winners: Vec<PrizeWinnerEntity>) -> Self {
        Self {
            session_id: session_id.to_string(),
            winners: winners
                .into_iter()
                .map(|winner| PrizeWinnerDocument {
                    position: winner.position,
                    participant_id: winner.participant_id.to_string(),
                    score: winner.score,
                    completion_time_seconds: winner.completion_time_seconds,
                })
                .collect(),
        }
    }

    pub fn into_entities(self) -> Result<Vec<PrizeWinnerEntity>, MongoDaoError> {
        let session_id = parse_id("prize_boards", "_id", &self.session_id)?;
        self.winners
            .into_iter()
            .map(|winner| {
                Ok(PrizeWinnerEntity {
                    session_id,
                    position: winner.position,
                    participant_id: parse_id(
                        "prize_boards",
                        "winners.participant_id",
                        &winner.participant_id,
                    )?,
                    score: winner.score,
                    completion_time_seconds: winner.completion_time_seconds,
                })
            })
            .collect()
    }
}
