use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Exam;

pub(crate) const COLUMNS: &str = "\
    id, title, description, duration_minutes, passing_marks, is_active, \
    created_by, created_at, updated_at";

pub(crate) struct CreateExam<'a> {
    pub(crate) id: &'a str,
    pub(crate) title: &'a str,
    pub(crate) description: Option<&'a str>,
    pub(crate) duration_minutes: i32,
    pub(crate) passing_marks: i32,
    pub(crate) is_active: bool,
    pub(crate) created_by: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

pub(crate) async fn create(
    executor: impl sqlx::PgExecutor<'_>,
    exam: CreateExam<'_>,
) -> Result<Exam, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "INSERT INTO exams (id, title, description, duration_minutes, passing_marks, is_active, created_by, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
         RETURNING {COLUMNS}"
    ))
    .bind(exam.id)
    .bind(exam.title)
    .bind(exam.description)
    .bind(exam.duration_minutes)
    .bind(exam.passing_marks)
    .bind(exam.is_active)
    .bind(exam.created_by)
    .bind(exam.created_at)
    .bind(exam.updated_at)
    .fetch_one(executor)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_active(pool: &PgPool) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams WHERE is_active = TRUE ORDER BY created_at DESC"
    ))
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_by_creator(
    pool: &PgPool,
    created_by: &str,
) -> Result<Vec<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams WHERE created_by = $1 ORDER BY created_at DESC"
    ))
    .bind(created_by)
    .fetch_all(pool)
    .await
}

pub(crate) async fn set_active(
    pool: &PgPool,
    id: &str,
    is_active: bool,
    now: PrimitiveDateTime,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "UPDATE exams SET is_active = $1, updated_at = $2 WHERE id = $3 RETURNING {COLUMNS}"
    ))
    .bind(is_active)
    .bind(now)
    .bind(id)
    .fetch_optional(pool)
    .await
}
