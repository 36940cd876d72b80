use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    dao::models::{
        PerformanceCategory, PrizeWinnerEntity, ResultEntity, SessionEntity, SessionStatus,
    },
    dto::{format_optional_time, format_system_time},
};

/// Polling view of a session phase, computed from the stored phase stamps.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub phase_start_time: Option<String>,
    pub phase_end_time: Option<String>,
    /// Time left in the current phase; absent once the session is over.
    pub remaining_millis: Option<u64>,
    pub server_time: String,
}

/// Administrative view of a session record.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionSummary {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub name: String,
    pub status: SessionStatus,
    pub start_time: String,
    pub instruction_start_time: Option<String>,
    pub quiz_start_time: Option<String>,
    pub end_time: Option<String>,
    pub auto_start: bool,
    pub max_participants: Option<u32>,
    pub prizes_calculated: bool,
}

impl From<SessionEntity> for SessionSummary {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            quiz_id: value.quiz_id,
            name: value.name,
            status: value.status,
            start_time: format_system_time(value.start_time),
            instruction_start_time: format_optional_time(value.instruction_start_time),
            quiz_start_time: format_optional_time(value.quiz_start_time),
            end_time: format_optional_time(value.end_time),
            auto_start: value.auto_start,
            max_participants: value.max_participants,
            prizes_calculated: value.prizes_calculated,
        }
    }
}

/// Final outcome of one participant.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ResultView {
    pub participant_id: Uuid,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub incorrect_answers: u32,
    pub unanswered: u32,
    pub total_score: u32,
    pub percentage_score: u32,
    pub completion_time_seconds: u32,
    pub performance_category: PerformanceCategory,
}

impl From<ResultEntity> for ResultView {
    fn from(value: ResultEntity) -> Self {
        Self {
            participant_id: value.participant_id,
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

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PrizeWinnerView {
    pub position: u8,
    pub participant_id: Uuid,
    pub score: u32,
    pub completion_time_seconds: u32,
}

impl From<PrizeWinnerEntity> for PrizeWinnerView {
    fn from(value: PrizeWinnerEntity) -> Self {
        Self {
            position: value.position,
            participant_id: value.participant_id,
            score: value.score,
            completion_time_seconds: value.completion_time_seconds,
        }
    }
}

/// Results of every participant, best ranked first.
#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResultsResponse {
    pub session_id: Uuid,
    pub results: Vec<ResultView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PrizeBoardResponse {
    pub session_id: Uuid,
    pub winners: Vec<PrizeWinnerView>,
}
