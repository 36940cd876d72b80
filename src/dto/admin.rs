use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::{
    dao::models::{QuizEntity, SessionStatus},
    dto::{
        session::PrizeWinnerView,
        validation::{ANSWER_OPTIONS, normalize_answer, validate_answer_option},
    },
};

fn default_true() -> bool {
    true
}

/// Payload used to register a quiz definition.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateQuizRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    #[validate(length(min = 1), nested)]
    pub questions: Vec<QuestionInput>,
    #[validate(range(max = 120))]
    pub instruction_time_minutes: u32,
    #[validate(range(min = 1, max = 600))]
    pub quiz_time_minutes: u32,
    #[serde(default = "default_true")]
    pub shuffle_questions: bool,
    /// Only honoured when the deployment enables option shuffling.
    #[serde(default)]
    pub shuffle_options: bool,
}

/// Incoming question definition.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QuestionInput {
    pub prompt: String,
    /// Option texts keyed by letter (`a`..`d`).
    #[schema(value_type = Object)]
    pub options: IndexMap<String, String>,
    pub correct_answer: String,
}

impl Validate for QuestionInput {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.prompt.trim().is_empty() {
            errors.add("prompt", ValidationError::new("prompt_empty"));
        }

        if self.options.len() < 2 {
            let mut err = ValidationError::new("options_count");
            err.message = Some("A question needs at least two options".into());
            errors.add("options", err);
        }

        if let Some(letter) = self
            .options
            .keys()
            .find(|letter| !ANSWER_OPTIONS.contains(&normalize_answer(letter).as_str()))
        {
            let mut err = ValidationError::new("options_letter");
            err.message = Some(format!("Unknown option letter `{letter}`").into());
            errors.add("options", err);
        }

        match validate_answer_option(&self.correct_answer) {
            Err(err) => errors.add("correct_answer", err),
            Ok(()) => {
                let correct = normalize_answer(&self.correct_answer);
                let offered = self
                    .options
                    .keys()
                    .any(|letter| normalize_answer(letter) == correct);
                if !offered {
                    let mut err = ValidationError::new("correct_answer_missing");
                    err.message = Some("The correct answer must be one of the options".into());
                    errors.add("correct_answer", err);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Summary returned once a quiz has been stored.
#[derive(Debug, Serialize, ToSchema)]
pub struct QuizSummary {
    pub id: Uuid,
    pub title: String,
    pub question_count: usize,
    pub instruction_time_minutes: u32,
    pub quiz_time_minutes: u32,
    pub shuffle_questions: bool,
    pub shuffle_options: bool,
}

impl From<&QuizEntity> for QuizSummary {
    fn from(value: &QuizEntity) -> Self {
        Self {
            id: value.id,
            title: value.title.clone(),
            question_count: value.questions.len(),
            instruction_time_minutes: value.instruction_time_minutes,
            quiz_time_minutes: value.quiz_time_minutes,
            shuffle_questions: value.shuffle_questions,
            shuffle_options: value.shuffle_options,
        }
    }
}

/// Payload used to schedule a session of an existing quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    pub quiz_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    /// RFC 3339 timestamp at which the instruction phase is due.
    pub start_time: String,
    #[serde(default = "default_true")]
    pub auto_start: bool,
    #[validate(range(min = 1))]
    pub max_participants: Option<u32>,
}

/// Result of an admin-triggered phase change.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransitionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// `false` when another actor had already moved the session.
    pub applied: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PrizeCalculationResponse {
    pub session_id: Uuid,
    pub results_computed: usize,
    pub winners: Vec<PrizeWinnerView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(correct: &str) -> QuestionInput {
        let mut options = IndexMap::new();
        options.insert("a".to_string(), "Ownership".to_string());
        options.insert("b".to_string(), "Garbage collection".to_string());
        QuestionInput {
            prompt: "How does Rust manage memory?".into(),
            options,
            correct_answer: correct.into(),
        }
    }

    #[test]
    fn accepts_well_formed_question() {
        assert!(question("A").validate().is_ok());
    }

    #[test]
    fn rejects_correct_answer_outside_options() {
        let errors = question("c").validate().unwrap_err();
        assert!(errors.field_errors().contains_key("correct_answer"));
    }

    #[test]
    fn rejects_unknown_option_letters() {
        let mut input = question("a");
        input.options.insert("z".into(), "Reference counting".into());
        let errors = input.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("options"));
    }

    #[test]
    fn quiz_requires_questions_and_duration() {
        let request = CreateQuizRequest {
            title: "Empty".into(),
            questions: Vec::new(),
            instruction_time_minutes: 5,
            quiz_time_minutes: 0,
            shuffle_questions: true,
            shuffle_options: false,
        };
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("questions"));
        assert!(fields.contains_key("quiz_time_minutes"));
    }

    #[test]
    fn serialized_questions_are_accepted_back_in_a_quiz() {
        let body = serde_json::json!({
            "title": "Memory models",
            "questions": [question("b"), question("c")],
            "instruction_time_minutes": 2,
            "quiz_time_minutes": 10,
        });
        assert_eq!(body["questions"][0]["options"]["b"], "Garbage collection");
        assert_eq!(body["questions"][0]["correct_answer"], "b");

        let request: CreateQuizRequest = serde_json::from_value(body).unwrap();
        assert!(request.shuffle_questions);
        let errors = request.validate().unwrap_err();
        assert!(errors.errors().contains_key("questions"));
    }
}
