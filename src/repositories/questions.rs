use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Question;
use crate::db::types::{ChoiceOption, QuestionKind};

pub(crate) const COLUMNS: &str = "\
    id, exam_id, question_text, kind, option_a, option_b, option_c, option_d, \
    correct_option, marks, position, created_at, updated_at";

pub(crate) struct CreateQuestion<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) question_text: &'a str,
    pub(crate) kind: QuestionKind,
    pub(crate) options: Option<[&'a str; 4]>,
    pub(crate) correct_option: Option<ChoiceOption>,
    pub(crate) marks: i32,
    pub(crate) position: i32,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    question: CreateQuestion<'_>,
) -> Result<Question, sqlx::Error> {
    let [option_a, option_b, option_c, option_d] = match question.options {
        Some(options) => options.map(Some),
        None => [None; 4],
    };

    sqlx::query_as::<_, Question>(&format!(
        "INSERT INTO questions (
            id, exam_id, question_text, kind, option_a, option_b, option_c, option_d,
            correct_option, marks, position, created_at, updated_at
        ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
        RETURNING {COLUMNS}"
    ))
    .bind(question.id)
    .bind(question.exam_id)
    .bind(question.question_text)
    .bind(question.kind)
    .bind(option_a)
    .bind(option_b)
    .bind(option_c)
    .bind(option_d)
    .bind(question.correct_option)
    .bind(question.marks)
    .bind(question.position)
    .bind(question.created_at)
    .bind(question.updated_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!("SELECT {COLUMNS} FROM questions WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn list_by_exam(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(&format!(
        "SELECT {COLUMNS} FROM questions WHERE exam_id = $1 ORDER BY position, created_at"
    ))
    .bind(exam_id)
    .fetch_all(executor)
    .await
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct QuestionStats {
    pub(crate) count: i64,
    pub(crate) min_marks: i32,
    pub(crate) total_marks: i64,
}

/// Aggregate view used to validate an exam's question set before an attempt
/// may start: at least one question, every mark positive.
pub(crate) async fn stats_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<QuestionStats, sqlx::Error> {
    sqlx::query_as::<_, QuestionStats>(
        "SELECT COUNT(*) AS count,
                COALESCE(MIN(marks), 0) AS min_marks,
                COALESCE(SUM(marks), 0) AS total_marks
         FROM questions WHERE exam_id = $1",
    )
    .bind(exam_id)
    .fetch_one(pool)
    .await
}

pub(crate) async fn sum_marks(
    executor: impl sqlx::PgExecutor<'_>,
    exam_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COALESCE(SUM(marks), 0) FROM questions WHERE exam_id = $1")
        .bind(exam_id)
        .fetch_one(executor)
        .await
}
