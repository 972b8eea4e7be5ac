use serde::{Deserialize, Serialize};

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::{Attempt, Question};
use crate::db::types::{AttemptStatus, QuestionKind};
use crate::services::submission::SubmittedAnswer;

#[derive(Debug, Serialize)]
pub(crate) struct AttemptResponse {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) student_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: String,
    pub(crate) deadline_at: String,
    pub(crate) submitted_at: Option<String>,
    pub(crate) tab_switch_count: i32,
    pub(crate) score: Option<i32>,
    pub(crate) total_marks: Option<i32>,
    pub(crate) percentage: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) requires_manual_grading: bool,
    pub(crate) manual_grading_completed: bool,
}

pub(crate) fn attempt_to_response(attempt: Attempt) -> AttemptResponse {
    AttemptResponse {
        id: attempt.id,
        exam_id: attempt.exam_id,
        student_id: attempt.student_id,
        status: attempt.status,
        started_at: format_primitive(attempt.started_at),
        deadline_at: format_primitive(attempt.deadline_at),
        submitted_at: attempt.submitted_at.map(format_primitive),
        tab_switch_count: attempt.tab_switch_count,
        score: attempt.score,
        total_marks: attempt.total_marks,
        percentage: attempt.percentage,
        passed: attempt.passed,
        requires_manual_grading: attempt.requires_manual_grading,
        manual_grading_completed: attempt.manual_grading_completed,
    }
}

/// Question as the exam-taking client sees it. There is deliberately no
/// field that could hold the answer key: the single-choice variant carries
/// the four option texts and nothing else.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum QuestionView {
    SingleChoice {
        id: String,
        question_text: String,
        option_a: String,
        option_b: String,
        option_c: String,
        option_d: String,
        marks: i32,
        position: i32,
    },
    FreeText {
        id: String,
        question_text: String,
        marks: i32,
        position: i32,
    },
}

impl From<Question> for QuestionView {
    fn from(question: Question) -> Self {
        match question.kind {
            QuestionKind::SingleChoice => QuestionView::SingleChoice {
                id: question.id,
                question_text: question.question_text,
                option_a: question.option_a.unwrap_or_default(),
                option_b: question.option_b.unwrap_or_default(),
                option_c: question.option_c.unwrap_or_default(),
                option_d: question.option_d.unwrap_or_default(),
                marks: question.marks,
                position: question.position,
            },
            QuestionKind::FreeText => QuestionView::FreeText {
                id: question.id,
                question_text: question.question_text,
                marks: question.marks,
                position: question.position,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitRequest {
    #[serde(default)]
    pub(crate) answers: Vec<SubmittedAnswer>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FocusLossResponse {
    pub(crate) attempt_id: String,
    pub(crate) tab_switch_count: i32,
    /// False once the attempt is submitted; late signals are dropped.
    pub(crate) recorded: bool,
}
