use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Answer;
use crate::db::types::{ChoiceOption, QuestionKind};

pub(crate) const COLUMNS: &str = "\
    id, attempt_id, question_id, selected_option, is_correct, response_text, \
    is_graded, awarded_marks, graded_by, graded_at, created_at";

pub(crate) struct CreateAnswer<'a> {
    pub(crate) id: &'a str,
    pub(crate) attempt_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) selected_option: Option<ChoiceOption>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) response_text: Option<&'a str>,
    pub(crate) is_graded: bool,
    pub(crate) awarded_marks: Option<i32>,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    answer: CreateAnswer<'_>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO answers (
            id, attempt_id, question_id, selected_option, is_correct, response_text,
            is_graded, awarded_marks, created_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)",
    )
    .bind(answer.id)
    .bind(answer.attempt_id)
    .bind(answer.question_id)
    .bind(answer.selected_option)
    .bind(answer.is_correct)
    .bind(answer.response_text)
    .bind(answer.is_graded)
    .bind(answer.awarded_marks)
    .bind(answer.created_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!("SELECT {COLUMNS} FROM answers WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ManualGradingRow {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) question_text: String,
    pub(crate) max_marks: i32,
    pub(crate) response_text: Option<String>,
    pub(crate) is_graded: bool,
    pub(crate) awarded_marks: Option<i32>,
}

/// Free-text answers of one attempt, in question order, with the context a
/// grader needs. Single-choice answers never appear here.
pub(crate) async fn list_manual_by_attempt(
    pool: &PgPool,
    attempt_id: &str,
) -> Result<Vec<ManualGradingRow>, sqlx::Error> {
    sqlx::query_as::<_, ManualGradingRow>(
        "SELECT an.id,
                an.question_id,
                q.question_text,
                q.marks AS max_marks,
                an.response_text,
                an.is_graded,
                an.awarded_marks
         FROM answers an
         JOIN questions q ON q.id = an.question_id
         WHERE an.attempt_id = $1 AND q.kind = $2
         ORDER BY q.position, q.created_at",
    )
    .bind(attempt_id)
    .bind(QuestionKind::FreeText)
    .fetch_all(pool)
    .await
}

/// Runs inside a transaction holding the attempt row lock, so a concurrent
/// finalize cannot slip between the status check and this write.
pub(crate) async fn grade(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    awarded_marks: i32,
    graded_by: &str,
    now: PrimitiveDateTime,
) -> Result<Option<Answer>, sqlx::Error> {
    sqlx::query_as::<_, Answer>(&format!(
        "UPDATE answers
         SET awarded_marks = $2, is_graded = TRUE, graded_by = $3, graded_at = $4
         WHERE id = $1
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(awarded_marks)
    .bind(graded_by)
    .bind(now)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_ungraded(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM answers WHERE attempt_id = $1 AND is_graded = FALSE",
    )
    .bind(attempt_id)
    .fetch_one(executor)
    .await
}

pub(crate) async fn sum_awarded(
    executor: impl sqlx::PgExecutor<'_>,
    attempt_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COALESCE(SUM(awarded_marks), 0) FROM answers WHERE attempt_id = $1",
    )
    .bind(attempt_id)
    .fetch_one(executor)
    .await
}
