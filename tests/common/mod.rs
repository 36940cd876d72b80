#![allow(dead_code)]

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use tokio::sync::broadcast::{self, error::RecvError};
use quiz_arena_back::{
    clock::ManualClock,
    config::AppConfig,
    dao::{
        models::{QuestionEntity, QuizEntity, SessionEntity, SessionStatus},
        quiz_store::{QuizStore, memory::MemoryQuizStore},
    },
    dto::{participant::SubmitAnswerRequest, sse::ServerEvent},
    services::{participant_service, scheduler::Scheduler, submission_service},
    state::{AppState, SharedState},
};
use uuid::Uuid;

pub const BASE_SECS: u64 = 1_700_000_000;

pub fn at(secs: u64) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(BASE_SECS + secs)
}

pub struct Harness {
    pub state: SharedState,
    pub clock: Arc<ManualClock>,
    pub store: MemoryQuizStore,
    pub scheduler: Scheduler,
    admin_events: broadcast::Receiver<ServerEvent>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(AppConfig::default()).await
    }

    pub async fn with_config(config: AppConfig) -> Self {
        let clock = Arc::new(ManualClock::new(at(0)));
        let store = MemoryQuizStore::new();
        let state = AppState::with_store(config, clock.clone(), Arc::new(store.clone())).await;
        let scheduler = Scheduler::new(state.clone());
        let admin_events = state.rooms().admin().subscribe();
        Self {
            state,
            clock,
            store,
            scheduler,
            admin_events,
        }
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }

    /// Store a quiz whose correct answer is always `a`.
    pub async fn quiz(&self, questions: usize, instruction_minutes: u32, quiz_minutes: u32) -> QuizEntity {
        let quiz = QuizEntity {
            id: Uuid::new_v4(),
            title: "General knowledge".into(),
            questions: (0..questions)
                .map(|index| {
                    let mut options = IndexMap::new();
                    for letter in ["a", "b", "c", "d"] {
                        options.insert(letter.to_string(), format!("Option {letter} of {index}"));
                    }
                    QuestionEntity {
                        id: Uuid::new_v4(),
                        prompt: format!("Question {index}"),
                        options,
                        correct_answer: "a".into(),
                    }
                })
                .collect(),
            instruction_time_minutes: instruction_minutes,
            quiz_time_minutes: quiz_minutes,
            shuffle_questions: true,
            shuffle_options: false,
            created_at: at(0),
        };
        self.store.save_quiz(quiz.clone()).await.unwrap();
        quiz
    }

    /// Schedule an auto-start session due `start_in` seconds from now.
    pub async fn schedule(&self, quiz: &QuizEntity, start_in: u64) -> SessionEntity {
        let now = self.state.now();
        let session = SessionEntity {
            id: Uuid::new_v4(),
            quiz_id: quiz.id,
            name: "Evening round".into(),
            status: SessionStatus::Scheduled,
            start_time: now + Duration::from_secs(start_in),
            instruction_start_time: None,
            quiz_start_time: None,
            end_time: None,
            auto_start: true,
            max_participants: None,
            prizes_calculated: false,
            finalization_claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.save_session(session.clone()).await.unwrap();
        session
    }

    /// Drive the scheduler until the session is active; returns the stored record.
    pub async fn run_to_active(&mut self, session: &SessionEntity, quiz: &QuizEntity) -> SessionEntity {
        self.clock.set(session.start_time);
        self.scheduler.tick().await.unwrap();
        self.advance(u64::from(quiz.instruction_time_minutes) * 60);
        self.scheduler.tick().await.unwrap();
        let active = self.session(session.id).await;
        assert_eq!(active.status, SessionStatus::Active);
        active
    }

    pub async fn session(&self, id: Uuid) -> SessionEntity {
        self.store.find_session(id).await.unwrap().unwrap()
    }

    /// Fetch questions, then answer the first `correct` right and the next `wrong` wrong.
    pub async fn answer(&self, session_id: Uuid, participant_id: Uuid, correct: usize, wrong: usize) {
        let questions = participant_service::get_questions(&self.state, session_id, participant_id)
            .await
            .unwrap()
            .questions;
        for (index, question) in questions.iter().take(correct + wrong).enumerate() {
            let selected = if index < correct { "a" } else { "b" };
            submission_service::submit_answer(
                &self.state,
                session_id,
                participant_id,
                SubmitAnswerRequest {
                    question_id: question.question_id,
                    selected_answer: selected.into(),
                    time_taken_seconds: 10,
                },
            )
            .await
            .unwrap();
        }
    }

    /// Wait for the `results.ready` announcement of a session.
    pub async fn wait_for_results(&mut self, session_id: Uuid) -> SessionEntity {
        let marker = session_id.to_string();
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), self.admin_events.recv())
                .await
                .expect("session was never finalized");
            match event {
                Ok(event)
                    if event.event.as_deref() == Some("results.ready")
                        && event.data.contains(&marker) =>
                {
                    return self.session(session_id).await;
                }
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("admin hub closed"),
            }
        }
    }
}
