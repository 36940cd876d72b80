//! Deterministic per-participant question ordering.
//!
//! The generator is seeded from the session and participant identifiers, so a
//! participant sees the same order on every fetch while two participants (or
//! the same participant in two sessions) get independent orders.

use indexmap::IndexMap;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use uuid::Uuid;

use crate::{
    dao::models::{OptionMapping, QuestionEntity, QuizEntity, ShuffledQuestionEntry},
    dto::participant::{OptionView, QuestionView},
};

/// 32-byte seed made of the session id followed by the participant id.
pub fn seed_for(session_id: Uuid, participant_id: Uuid) -> [u8; 32] {
    let mut seed = [0u8; 32];
    seed[..16].copy_from_slice(session_id.as_bytes());
    seed[16..].copy_from_slice(participant_id.as_bytes());
    seed
}

/// Build the personal ordering of `quiz` for one participant.
///
/// `shuffle_options` is the effective switch (quiz request and deployment
/// policy combined); when off every entry keeps `option_mapping = None`.
pub fn build_order(
    quiz: &QuizEntity,
    session_id: Uuid,
    participant_id: Uuid,
    shuffle_options: bool,
) -> Vec<ShuffledQuestionEntry> {
    let mut rng = StdRng::from_seed(seed_for(session_id, participant_id));

    let mut order: Vec<usize> = (0..quiz.questions.len()).collect();
    if quiz.shuffle_questions {
        order.shuffle(&mut rng);
    }

    order
        .into_iter()
        .enumerate()
        .map(|(position, original)| {
            let question = &quiz.questions[original];
            let option_mapping = shuffle_options.then(|| option_mapping(question, &mut rng));
            ShuffledQuestionEntry {
                question_id: question.id,
                original_order: original as u32 + 1,
                shuffled_order: position as u32 + 1,
                option_mapping,
            }
        })
        .collect()
}

fn option_mapping(question: &QuestionEntity, rng: &mut StdRng) -> OptionMapping {
    let displayed: Vec<String> = question.options.keys().cloned().collect();
    let mut canonical = displayed.clone();
    canonical.shuffle(rng);

    let mut canonical_to_displayed = IndexMap::with_capacity(displayed.len());
    let mut displayed_to_canonical = IndexMap::with_capacity(displayed.len());
    for (shown, actual) in displayed.iter().zip(canonical) {
        canonical_to_displayed.insert(actual.clone(), shown.clone());
        displayed_to_canonical.insert(shown.clone(), actual);
    }

    OptionMapping {
        canonical_to_displayed,
        displayed_to_canonical,
    }
}

/// Translate a letter as displayed to the participant back to the canonical letter.
pub fn canonical_answer(entry: &ShuffledQuestionEntry, displayed: &str) -> String {
    entry
        .option_mapping
        .as_ref()
        .and_then(|mapping| mapping.displayed_to_canonical.get(displayed))
        .cloned()
        .unwrap_or_else(|| displayed.to_string())
}

/// Render a question for a participant, options in displayed order and without the answer.
pub fn present_question(question: &QuestionEntity, entry: &ShuffledQuestionEntry) -> QuestionView {
    let options = question
        .options
        .keys()
        .map(|shown| {
            let canonical = canonical_answer(entry, shown);
            let text = question
                .options
                .get(&canonical)
                .cloned()
                .unwrap_or_default();
            OptionView {
                letter: shown.clone(),
                text,
            }
        })
        .collect();

    QuestionView {
        question_id: question.id,
        position: entry.shuffled_order,
        prompt: question.prompt.clone(),
        options,
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn quiz(size: usize, shuffle_questions: bool) -> QuizEntity {
        let questions = (0..size)
            .map(|index| {
                let mut options = IndexMap::new();
                for letter in ["a", "b", "c", "d"] {
                    options.insert(letter.to_string(), format!("q{index} option {letter}"));
                }
                QuestionEntity {
                    id: Uuid::from_u128(index as u128 + 1),
                    prompt: format!("question {index}"),
                    options,
                    correct_answer: "a".into(),
                }
            })
            .collect();
        QuizEntity {
            id: Uuid::from_u128(99),
            title: "Shuffled".into(),
            questions,
            instruction_time_minutes: 1,
            quiz_time_minutes: 10,
            shuffle_questions,
            shuffle_options: true,
            created_at: SystemTime::UNIX_EPOCH,
        }
    }

    fn ids(order: &[ShuffledQuestionEntry]) -> Vec<Uuid> {
        order.iter().map(|entry| entry.question_id).collect()
    }

    #[test]
    fn same_identity_yields_same_order() {
        let quiz = quiz(10, true);
        let session = Uuid::from_u128(0xfeed);
        let participant = Uuid::from_u128(0xbeef);
        let first = build_order(&quiz, session, participant, false);
        let second = build_order(&quiz, session, participant, false);
        assert_eq!(first, second);
    }

    #[test]
    fn participants_get_independent_orders() {
        let quiz = quiz(10, true);
        let session = Uuid::from_u128(0xfeed);
        let first = build_order(&quiz, session, Uuid::from_u128(1), false);
        let second = build_order(&quiz, session, Uuid::from_u128(2), false);
        assert_ne!(ids(&first), ids(&second));
    }

    #[test]
    fn order_is_a_permutation_with_positions() {
        let quiz = quiz(7, true);
        let order = build_order(&quiz, Uuid::from_u128(3), Uuid::from_u128(4), false);

        let mut seen = ids(&order);
        seen.sort();
        let mut expected: Vec<Uuid> = quiz.questions.iter().map(|q| q.id).collect();
        expected.sort();
        assert_eq!(seen, expected);

        let positions: Vec<u32> = order.iter().map(|entry| entry.shuffled_order).collect();
        assert_eq!(positions, (1..=7).collect::<Vec<_>>());
        for entry in &order {
            let original = &quiz.questions[entry.original_order as usize - 1];
            assert_eq!(original.id, entry.question_id);
        }
    }

    #[test]
    fn disabled_question_shuffle_keeps_authored_order() {
        let quiz = quiz(5, false);
        let order = build_order(&quiz, Uuid::from_u128(5), Uuid::from_u128(6), false);
        let expected: Vec<Uuid> = quiz.questions.iter().map(|q| q.id).collect();
        assert_eq!(ids(&order), expected);
        assert!(order.iter().all(|entry| entry.option_mapping.is_none()));
    }

    #[test]
    fn option_mapping_is_a_consistent_bijection() {
        let quiz = quiz(3, true);
        let order = build_order(&quiz, Uuid::from_u128(7), Uuid::from_u128(8), true);
        for entry in &order {
            let mapping = entry.option_mapping.as_ref().unwrap();
            assert_eq!(mapping.displayed_to_canonical.len(), 4);
            for (shown, canonical) in &mapping.displayed_to_canonical {
                assert_eq!(mapping.canonical_to_displayed.get(canonical), Some(shown));
                assert_eq!(&canonical_answer(entry, shown), canonical);
            }
        }
    }

    #[test]
    fn presented_options_follow_mapping_and_hide_answer() {
        let quiz = quiz(1, false);
        let order = build_order(&quiz, Uuid::from_u128(9), Uuid::from_u128(10), true);
        let entry = &order[0];
        let view = present_question(&quiz.questions[0], entry);

        assert_eq!(view.position, 1);
        for option in &view.options {
            let canonical = canonical_answer(entry, &option.letter);
            assert_eq!(option.text, quiz.questions[0].options[&canonical]);
        }
    }

    #[test]
    fn canonical_answer_passes_through_without_mapping() {
        let quiz = quiz(1, false);
        let order = build_order(&quiz, Uuid::from_u128(11), Uuid::from_u128(12), false);
        assert_eq!(canonical_answer(&order[0], "c"), "c");
    }
}
