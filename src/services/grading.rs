//! Pure scoring rules. The answer key stays on this side of the trust
//! boundary: callers hand in the full question row, never the client's idea
//! of correctness.

use crate::db::models::Question;
use crate::db::types::ChoiceOption;

/// Outcome of auto-grading one single-choice answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChoiceGrade {
    pub(crate) is_correct: bool,
    pub(crate) awarded_marks: i32,
}

/// Grade a single-choice answer against the server-held key. An unanswered
/// question is simply wrong, not an error.
pub(crate) fn grade_choice(question: &Question, selected: Option<ChoiceOption>) -> ChoiceGrade {
    let is_correct = match (question.correct_option, selected) {
        (Some(key), Some(selected)) => key == selected,
        _ => false,
    };
    ChoiceGrade { is_correct, awarded_marks: if is_correct { question.marks } else { 0 } }
}

/// Final totals for an attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ScoreSummary {
    pub(crate) score: i32,
    pub(crate) total_marks: i32,
    pub(crate) percentage: f64,
    pub(crate) passed: bool,
}

/// Deterministic aggregation: same inputs, same totals. `total_marks` is the
/// sum over the exam's question set, never a client-supplied figure.
pub(crate) fn aggregate(score: i32, total_marks: i32, passing_marks: i32) -> ScoreSummary {
    let percentage =
        if total_marks > 0 { f64::from(score) * 100.0 / f64::from(total_marks) } else { 0.0 };
    ScoreSummary { score, total_marks, percentage, passed: score >= passing_marks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::db::types::QuestionKind;

    fn choice_question(correct: ChoiceOption, marks: i32) -> Question {
        let now = primitive_now_utc();
        Question {
            id: "q1".to_string(),
            exam_id: "e1".to_string(),
            question_text: "2 + 2 = ?".to_string(),
            kind: QuestionKind::SingleChoice,
            option_a: Some("3".to_string()),
            option_b: Some("4".to_string()),
            option_c: Some("5".to_string()),
            option_d: Some("22".to_string()),
            correct_option: Some(correct),
            marks,
            position: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn correct_choice_awards_full_marks() {
        let question = choice_question(ChoiceOption::B, 5);
        let grade = grade_choice(&question, Some(ChoiceOption::B));
        assert!(grade.is_correct);
        assert_eq!(grade.awarded_marks, 5);
    }

    #[test]
    fn wrong_choice_awards_nothing() {
        let question = choice_question(ChoiceOption::B, 5);
        let grade = grade_choice(&question, Some(ChoiceOption::C));
        assert!(!grade.is_correct);
        assert_eq!(grade.awarded_marks, 0);
    }

    #[test]
    fn unanswered_choice_is_wrong_not_an_error() {
        let question = choice_question(ChoiceOption::A, 3);
        let grade = grade_choice(&question, None);
        assert!(!grade.is_correct);
        assert_eq!(grade.awarded_marks, 0);
    }

    #[test]
    fn aggregate_computes_percentage_and_pass() {
        let summary = aggregate(45, 100, 40);
        assert_eq!(summary.score, 45);
        assert_eq!(summary.total_marks, 100);
        assert!((summary.percentage - 45.0).abs() < f64::EPSILON);
        assert!(summary.passed);
    }

    #[test]
    fn aggregate_passes_on_exact_boundary() {
        assert!(aggregate(40, 100, 40).passed);
        assert!(!aggregate(39, 100, 40).passed);
    }

    #[test]
    fn aggregate_is_reproducible() {
        assert_eq!(aggregate(17, 60, 30), aggregate(17, 60, 30));
    }

    #[test]
    fn aggregate_guards_against_empty_question_set() {
        let summary = aggregate(0, 0, 1);
        assert_eq!(summary.percentage, 0.0);
        assert!(!summary.passed);
    }
}
