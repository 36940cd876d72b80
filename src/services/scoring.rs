//! Result calculation and prize ranking.

use std::{
    cmp::Ordering,
    time::{Duration, SystemTime},
};

use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, PerformanceCategory, PrizeWinnerEntity, ResultEntity, SessionParticipantEntity,
};

/// Bucket a percentage score.
pub fn performance_category(percentage: u32) -> PerformanceCategory {
    match percentage {
        80.. => PerformanceCategory::Excellent,
        60..=79 => PerformanceCategory::Good,
        _ => PerformanceCategory::NeedsImprovement,
    }
}

/// `round(100 * correct / total)` with halves rounded up; zero for an empty quiz.
pub fn percentage(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let (correct, total) = (u64::from(correct), u64::from(total));
    ((200 * correct + total) / (2 * total)) as u32
}

/// Seconds between joining and finishing, capped at the quiz duration.
///
/// The cap keeps explicit submissions comparable with auto-submitted
/// participants, who are always charged the full duration.
pub fn completion_seconds(joined_at: SystemTime, finished_at: SystemTime, duration: Duration) -> u32 {
    let spent = finished_at
        .duration_since(joined_at)
        .unwrap_or(Duration::ZERO)
        .min(duration);
    spent.as_secs() as u32
}

/// Aggregate one participant's answers into a result record.
pub fn calculate_result<'a>(
    participant: &SessionParticipantEntity,
    total_questions: u32,
    answers: impl IntoIterator<Item = &'a AnswerEntity>,
    completion_time_seconds: u32,
) -> ResultEntity {
    let (mut correct, mut incorrect) = (0u32, 0u32);
    for answer in answers {
        if answer.is_correct {
            correct += 1;
        } else {
            incorrect += 1;
        }
    }
    let answered = (correct + incorrect).min(total_questions);
    let percentage_score = percentage(correct, total_questions);

    ResultEntity {
        session_id: participant.session_id,
        participant_id: participant.participant_id,
        total_questions,
        correct_answers: correct,
        incorrect_answers: answered - correct.min(answered),
        unanswered: total_questions - answered,
        total_score: correct,
        percentage_score,
        completion_time_seconds,
        performance_category: performance_category(percentage_score),
    }
}

/// Ranking order: higher score first, then faster completion, then participant id.
pub fn ranking_order(left: &ResultEntity, right: &ResultEntity) -> Ordering {
    right
        .total_score
        .cmp(&left.total_score)
        .then(left.completion_time_seconds.cmp(&right.completion_time_seconds))
        .then(left.participant_id.cmp(&right.participant_id))
}

/// Award the first `positions` places among participants who scored.
pub fn rank_prizes(
    session_id: Uuid,
    results: &[ResultEntity],
    positions: u8,
) -> Vec<PrizeWinnerEntity> {
    let mut eligible: Vec<&ResultEntity> = results
        .iter()
        .filter(|result| result.total_score > 0)
        .collect();
    eligible.sort_by(|left, right| ranking_order(left, right));

    eligible
        .into_iter()
        .take(usize::from(positions))
        .zip(1u8..)
        .map(|(result, position)| PrizeWinnerEntity {
            session_id,
            position,
            participant_id: result.participant_id,
            score: result.total_score,
            completion_time_seconds: result.completion_time_seconds,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: Uuid = Uuid::from_u128(1);

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000 + secs)
    }

    fn participant(id: u128) -> SessionParticipantEntity {
        SessionParticipantEntity::joined(SESSION, Uuid::from_u128(id), at(0))
    }

    fn answers(participant: u128, correct: u32, incorrect: u32) -> Vec<AnswerEntity> {
        (0..correct + incorrect)
            .map(|index| AnswerEntity {
                session_id: SESSION,
                participant_id: Uuid::from_u128(participant),
                question_id: Uuid::from_u128(1_000 + u128::from(index)),
                selected_answer: "a".into(),
                is_correct: index < correct,
                time_taken_seconds: 10,
                answered_at: at(u64::from(index)),
            })
            .collect()
    }

    fn result(id: u128, score: u32, time: u32) -> ResultEntity {
        calculate_result(&participant(id), 20, &answers(id, score, 0), time)
    }

    #[test]
    fn category_thresholds() {
        assert_eq!(performance_category(100), PerformanceCategory::Excellent);
        assert_eq!(performance_category(80), PerformanceCategory::Excellent);
        assert_eq!(performance_category(79), PerformanceCategory::Good);
        assert_eq!(performance_category(60), PerformanceCategory::Good);
        assert_eq!(performance_category(59), PerformanceCategory::NeedsImprovement);
        assert_eq!(performance_category(0), PerformanceCategory::NeedsImprovement);
    }

    #[test]
    fn percentage_rounds_to_nearest() {
        assert_eq!(percentage(18, 20), 90);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(0, 0), 0);
    }

    #[test]
    fn eighteen_of_twenty_submitted_at_ten_minutes() {
        let completion = completion_seconds(at(0), at(600), Duration::from_secs(15 * 60));
        let result = calculate_result(&participant(7), 20, &answers(7, 18, 2), completion);
        assert_eq!(result.total_score, 18);
        assert_eq!(result.percentage_score, 90);
        assert_eq!(result.performance_category, PerformanceCategory::Excellent);
        assert_eq!(result.completion_time_seconds, 600);
        assert_eq!(result.unanswered, 0);
    }

    #[test]
    fn counts_always_add_up() {
        let result = calculate_result(&participant(8), 20, &answers(8, 6, 4), 900);
        assert_eq!(result.correct_answers, 6);
        assert_eq!(result.incorrect_answers, 4);
        assert_eq!(result.unanswered, 10);
        assert_eq!(
            result.correct_answers + result.incorrect_answers + result.unanswered,
            result.total_questions
        );
    }

    #[test]
    fn completion_time_runs_from_join_and_is_capped() {
        let duration = Duration::from_secs(900);
        assert_eq!(completion_seconds(at(0), at(420), duration), 420);
        // joined during instructions, charged from the join
        assert_eq!(completion_seconds(at(100), at(400), duration), 300);
        assert_eq!(completion_seconds(at(0), at(5_000), duration), 900);
        assert_eq!(completion_seconds(at(100), at(50), duration), 0);
    }

    #[test]
    fn ties_go_to_the_faster_participant() {
        let results = vec![result(1, 18, 600), result(2, 18, 400), result(3, 20, 500)];
        let winners = rank_prizes(SESSION, &results, 3);
        let order: Vec<(u8, Uuid, u32)> = winners
            .iter()
            .map(|winner| (winner.position, winner.participant_id, winner.score))
            .collect();
        assert_eq!(
            order,
            vec![
                (1, Uuid::from_u128(3), 20),
                (2, Uuid::from_u128(2), 18),
                (3, Uuid::from_u128(1), 18),
            ]
        );
    }

    #[test]
    fn zero_scores_never_win() {
        let results = vec![result(1, 20, 500), result(2, 18, 400), result(3, 0, 100)];
        let winners = rank_prizes(SESSION, &results, 3);
        assert_eq!(winners.len(), 2);
        assert_eq!(winners[0].participant_id, Uuid::from_u128(1));
        assert_eq!(winners[1].participant_id, Uuid::from_u128(2));
    }

    #[test]
    fn full_ties_fall_back_to_participant_id() {
        let results = vec![result(9, 10, 300), result(4, 10, 300)];
        let winners = rank_prizes(SESSION, &results, 1);
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].participant_id, Uuid::from_u128(4));
    }

    #[test]
    fn ranking_is_deterministic() {
        let results = vec![result(1, 12, 300), result(2, 15, 800), result(3, 12, 200)];
        assert_eq!(
            rank_prizes(SESSION, &results, 3),
            rank_prizes(SESSION, &results, 3)
        );
    }
}
