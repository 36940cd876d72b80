use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status persisted on every session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created by an admin, waiting for its start time.
    Scheduled,
    /// Instructions are displayed; the quiz has not opened yet.
    Instruction,
    /// Questions are open for answers.
    Active,
    /// Time is over (or everyone submitted); results are final.
    Completed,
    /// Never started and went stale.
    Cancelled,
}

impl SessionStatus {
    /// Whether the session can no longer change phase.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Instruction => "instruction",
            SessionStatus::Active => "active",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }
}

/// Progress of one participant inside a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Registered for the session but has not fetched questions yet.
    Joined,
    /// Fetched the question set and is answering.
    Started,
    /// Explicitly submitted the quiz.
    Submitted,
    /// Auto-submitted when the quiz time ran out.
    Timeout,
}

impl ParticipantStatus {
    /// Whether the participant can no longer record answers.
    pub fn is_finished(self) -> bool {
        matches!(self, ParticipantStatus::Submitted | ParticipantStatus::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParticipantStatus::Joined => "joined",
            ParticipantStatus::Started => "started",
            ParticipantStatus::Submitted => "submitted",
            ParticipantStatus::Timeout => "timeout",
        }
    }
}

/// Coarse grading bucket derived from the percentage score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum PerformanceCategory {
    /// 80% and above.
    Excellent,
    /// 60% up to 79%.
    Good,
    /// Below 60%.
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
}

/// A multiple-choice question as stored with its quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Stable identifier for the question.
    pub id: Uuid,
    /// Question text shown to participants.
    pub prompt: String,
    /// Option texts keyed by their canonical letter (`a`..`d`).
    pub options: IndexMap<String, String>,
    /// Canonical letter of the correct option. Never sent to participants.
    pub correct_answer: String,
}

/// Quiz definition shared by every session that runs it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizEntity {
    pub id: Uuid,
    pub title: String,
    /// Questions in their authored order.
    pub questions: Vec<QuestionEntity>,
    pub instruction_time_minutes: u32,
    pub quiz_time_minutes: u32,
    pub shuffle_questions: bool,
    /// Requested by the quiz author; only honoured when the deployment allows option shuffling.
    pub shuffle_options: bool,
    pub created_at: SystemTime,
}

/// One scheduled run of a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    pub id: Uuid,
    pub quiz_id: Uuid,
    pub name: String,
    pub status: SessionStatus,
    /// When the instruction phase is due.
    pub start_time: SystemTime,
    pub instruction_start_time: Option<SystemTime>,
    pub quiz_start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub auto_start: bool,
    pub max_participants: Option<u32>,
    /// Set once results and prizes are stored; the read APIs wait for it.
    pub prizes_calculated: bool,
    /// When a finalizer claimed the computation; cleared on release or completion.
    pub finalization_claimed_at: Option<SystemTime>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

/// Option-letter remapping for one question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionMapping {
    /// Canonical letter -> letter displayed to the participant.
    pub canonical_to_displayed: IndexMap<String, String>,
    /// Displayed letter -> canonical letter, used to grade submitted answers.
    pub displayed_to_canonical: IndexMap<String, String>,
}

/// Position of one question inside a participant's personal ordering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShuffledQuestionEntry {
    pub question_id: Uuid,
    pub original_order: u32,
    pub shuffled_order: u32,
    pub option_mapping: Option<OptionMapping>,
}

/// Registration of a participant in a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionParticipantEntity {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub status: ParticipantStatus,
    pub joined_at: SystemTime,
    pub started_quiz_at: Option<SystemTime>,
    pub submitted_at: Option<SystemTime>,
    pub completion_time_seconds: Option<u32>,
    /// Generated on first question fetch and never regenerated afterwards.
    pub shuffled_question_order: Option<Vec<ShuffledQuestionEntry>>,
}

impl SessionParticipantEntity {
    /// Fresh registration in the `joined` state.
    pub fn joined(session_id: Uuid, participant_id: Uuid, joined_at: SystemTime) -> Self {
        Self {
            session_id,
            participant_id,
            status: ParticipantStatus::Joined,
            joined_at,
            started_quiz_at: None,
            submitted_at: None,
            completion_time_seconds: None,
            shuffled_question_order: None,
        }
    }
}

/// Latest answer of a participant for one question. Keyed by (session, participant, question).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerEntity {
    pub session_id: Uuid,
    pub participant_id: Uuid,
    pub question_id: Uuid,
    /// Canonical letter after translating any option remapping.
    pub selected_answer: String,
    pub is_correct: bool,
    pub time_taken_seconds: u32,
    pub answered_at: SystemTime,
}

/// Aggregated outcome of one participant. Keyed by (session, participant).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultEntity {
    pub session_id: Uuid,
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

/// Prize position held by a participant. Keyed by (session, position).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrizeWinnerEntity {
    pub session_id: Uuid,
    pub position: u8,
    pub participant_id: Uuid,
    pub score: u32,
    pub completion_time_seconds: u32,
}

/// Field updates applied by a conditional session transition.
///
/// Only the stamps of the phase being entered are set; `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTransition {
    pub status: SessionStatus,
    pub instruction_start_time: Option<SystemTime>,
    pub quiz_start_time: Option<SystemTime>,
    pub end_time: Option<SystemTime>,
    pub updated_at: SystemTime,
}

impl SessionTransition {
    /// Apply the transition onto an in-memory session copy.
    pub fn apply_to(&self, session: &mut SessionEntity) {
        session.status = self.status;
        if let Some(at) = self.instruction_start_time {
            session.instruction_start_time = Some(at);
        }
        if let Some(at) = self.quiz_start_time {
            session.quiz_start_time = Some(at);
        }
        if let Some(at) = self.end_time {
            session.end_time = Some(at);
        }
        session.updated_at = self.updated_at;
    }
}
