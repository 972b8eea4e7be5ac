//! Submission coordinator: the only write path that moves an attempt out of
//! `in_progress`. Both the submit endpoint and the deadline sweeper go
//! through [`submit`], so a timer-driven and a user-driven submission race
//! safely against each other.

use std::collections::HashMap;

use serde::Deserialize;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::db::models::{Attempt, Question};
use crate::db::types::{AttemptStatus, ChoiceOption, QuestionKind};
use crate::repositories;
use crate::services::grading;

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SubmittedAnswer {
    pub(crate) question_id: String,
    #[serde(default)]
    pub(crate) selected_option: Option<ChoiceOption>,
    #[serde(default)]
    pub(crate) response_text: Option<String>,
}

pub(crate) enum SubmitOutcome {
    /// This call won the claim and wrote the answer set.
    Submitted(Attempt),
    /// A concurrent or earlier submit already went through; nothing written.
    AlreadySubmitted(Attempt),
}

impl SubmitOutcome {
    pub(crate) fn attempt(&self) -> &Attempt {
        match self {
            SubmitOutcome::Submitted(attempt) => attempt,
            SubmitOutcome::AlreadySubmitted(attempt) => attempt,
        }
    }
}

#[derive(Debug, Error)]
pub(crate) enum SubmitError {
    #[error("attempt not found")]
    AttemptNotFound,
    #[error("exam not found")]
    ExamNotFound,
    #[error("answer references unknown question {0}")]
    UnknownQuestion(String),
    #[error("answer payload does not match the kind of question {0}")]
    MismatchedAnswer(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub(crate) async fn submit(
    pool: &sqlx::PgPool,
    attempt_id: &str,
    answers: &[SubmittedAnswer],
    now: PrimitiveDateTime,
) -> Result<SubmitOutcome, SubmitError> {
    let attempt = repositories::attempts::find_by_id(pool, attempt_id)
        .await?
        .ok_or(SubmitError::AttemptNotFound)?;

    if attempt.status.is_submitted() {
        return Ok(SubmitOutcome::AlreadySubmitted(attempt));
    }

    let exam = repositories::exams::find_by_id(pool, &attempt.exam_id)
        .await?
        .ok_or(SubmitError::ExamNotFound)?;
    let questions = repositories::questions::list_by_exam(pool, &attempt.exam_id).await?;

    let by_question = index_answers(&questions, answers)?;

    let mut total_marks: i32 = 0;
    let mut auto_score: i32 = 0;
    let mut requires_manual_grading = false;
    let mut rows = Vec::with_capacity(questions.len());

    for question in &questions {
        total_marks += question.marks;
        let submitted = by_question.get(question.id.as_str());

        match question.kind {
            QuestionKind::SingleChoice => {
                let selected = submitted.and_then(|answer| answer.selected_option);
                let grade = grading::grade_choice(question, selected);
                auto_score += grade.awarded_marks;
                rows.push(AnswerRow {
                    question_id: &question.id,
                    selected_option: selected,
                    is_correct: Some(grade.is_correct),
                    response_text: None,
                    is_graded: true,
                    awarded_marks: Some(grade.awarded_marks),
                });
            }
            QuestionKind::FreeText => {
                requires_manual_grading = true;
                rows.push(AnswerRow {
                    question_id: &question.id,
                    selected_option: None,
                    is_correct: None,
                    response_text: submitted.and_then(|answer| answer.response_text.as_deref()),
                    is_graded: false,
                    awarded_marks: None,
                });
            }
        }
    }

    let outcome = if requires_manual_grading {
        repositories::attempts::SubmissionOutcome {
            status: AttemptStatus::PendingManualGrading,
            score: None,
            total_marks,
            percentage: None,
            passed: None,
            requires_manual_grading: true,
        }
    } else {
        let summary = grading::aggregate(auto_score, total_marks, exam.passing_marks);
        repositories::attempts::SubmissionOutcome {
            status: AttemptStatus::AutoGraded,
            score: Some(summary.score),
            total_marks: summary.total_marks,
            percentage: Some(summary.percentage),
            passed: Some(summary.passed),
            requires_manual_grading: false,
        }
    };

    // The claim and the answer writes share one transaction: either the
    // attempt transitions and the full answer set lands, or neither does.
    let mut tx = pool.begin().await?;

    let Some(claimed) =
        repositories::attempts::claim_submission(&mut *tx, attempt_id, &outcome, now).await?
    else {
        drop(tx);
        let attempt = repositories::attempts::fetch_one_by_id(pool, attempt_id).await?;
        return Ok(SubmitOutcome::AlreadySubmitted(attempt));
    };

    for row in &rows {
        repositories::answers::create(
            &mut *tx,
            repositories::answers::CreateAnswer {
                id: &Uuid::new_v4().to_string(),
                attempt_id,
                question_id: row.question_id,
                selected_option: row.selected_option,
                is_correct: row.is_correct,
                response_text: row.response_text,
                is_graded: row.is_graded,
                awarded_marks: row.awarded_marks,
                created_at: now,
            },
        )
        .await?;
    }

    tx.commit().await?;

    metrics::counter!(
        "attempt_submissions_total",
        "outcome" => if requires_manual_grading { "pending_manual_grading" } else { "auto_graded" }
    )
    .increment(1);
    tracing::info!(
        attempt_id,
        exam_id = %claimed.exam_id,
        status = ?claimed.status,
        score = ?claimed.score,
        "Attempt submitted"
    );

    Ok(SubmitOutcome::Submitted(claimed))
}

struct AnswerRow<'a> {
    question_id: &'a str,
    selected_option: Option<ChoiceOption>,
    is_correct: Option<bool>,
    response_text: Option<&'a str>,
    is_graded: bool,
    awarded_marks: Option<i32>,
}

fn index_answers<'a>(
    questions: &[Question],
    answers: &'a [SubmittedAnswer],
) -> Result<HashMap<&'a str, &'a SubmittedAnswer>, SubmitError> {
    let kinds: HashMap<&str, QuestionKind> =
        questions.iter().map(|question| (question.id.as_str(), question.kind)).collect();

    let mut indexed = HashMap::with_capacity(answers.len());
    for answer in answers {
        let Some(kind) = kinds.get(answer.question_id.as_str()) else {
            return Err(SubmitError::UnknownQuestion(answer.question_id.clone()));
        };

        let mismatched = match kind {
            QuestionKind::SingleChoice => answer.response_text.is_some(),
            QuestionKind::FreeText => answer.selected_option.is_some(),
        };
        if mismatched {
            return Err(SubmitError::MismatchedAnswer(answer.question_id.clone()));
        }

        indexed.insert(answer.question_id.as_str(), answer);
    }

    Ok(indexed)
}
