use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{dao::models::ParticipantStatus, dto::validation::validate_answer_option};

/// Registration acknowledgement.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinResponse {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub status: ParticipantStatus,
    pub joined_at: String,
    /// `true` when the participant was already registered before this call.
    pub already_joined: bool,
}

/// One displayed answer option.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OptionView {
    pub letter: String,
    pub text: String,
}

/// A question as presented to one participant; never carries the correct answer.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionView {
    pub question_id: Uuid,
    /// 1-based position inside this participant's personal ordering.
    pub position: u32,
    pub prompt: String,
    pub options: Vec<OptionView>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct QuestionSetResponse {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub remaining_millis: Option<u64>,
    pub questions: Vec<QuestionView>,
}

/// Answer for one question; resubmitting the same question overwrites it.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswerRequest {
    pub question_id: Uuid,
    /// Letter as displayed to the participant (`a`..`d`, case-insensitive).
    #[validate(custom(function = "validate_answer_option"))]
    pub selected_answer: String,
    #[serde(default)]
    pub time_taken_seconds: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerAck {
    pub question_id: Uuid,
    pub selected_answer: String,
    pub answered_at: String,
}

/// Outcome of a final quiz submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmissionResponse {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub status: ParticipantStatus,
    pub submitted_at: Option<String>,
    pub completion_time_seconds: Option<u32>,
    /// `true` when an earlier submission (or the timeout) already finalized the participant.
    pub already_submitted: bool,
}
