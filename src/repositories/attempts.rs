use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Attempt;
use crate::db::types::AttemptStatus;

pub(crate) const COLUMNS: &str = "\
    id, exam_id, student_id, status, started_at, deadline_at, submitted_at, \
    tab_switch_count, score, total_marks, percentage, passed, \
    requires_manual_grading, manual_grading_completed, created_at, updated_at";

pub(crate) struct CreateAttempt<'a> {
    pub(crate) id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) deadline_at: PrimitiveDateTime,
}

/// Insert the single attempt row for an (exam, student) pair. Duplicate
/// starts lose on the unique constraint rather than a pre-check, so two
/// racing inserts cannot both succeed.
pub(crate) async fn create(
    pool: &PgPool,
    attempt: CreateAttempt<'_>,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "INSERT INTO attempts (id, exam_id, student_id, status, started_at, deadline_at, created_at, updated_at)
         VALUES ($1,$2,$3,$4,$5,$6,$5,$5)
         ON CONFLICT ON CONSTRAINT attempts_exam_student_key DO NOTHING
         RETURNING {COLUMNS}"
    ))
    .bind(attempt.id)
    .bind(attempt.exam_id)
    .bind(attempt.student_id)
    .bind(AttemptStatus::InProgress)
    .bind(attempt.started_at)
    .bind(attempt.deadline_at)
    .fetch_optional(pool)
    .await
}

pub(crate) async fn find_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_optional(executor)
        .await
}

pub(crate) async fn fetch_one_by_id(pool: &PgPool, id: &str) -> Result<Attempt, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!("SELECT {COLUMNS} FROM attempts WHERE id = $1"))
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Row-locked read used inside the finalize transaction.
pub(crate) async fn lock_by_id(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn list_by_student(
    pool: &PgPool,
    student_id: &str,
) -> Result<Vec<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "SELECT {COLUMNS} FROM attempts WHERE student_id = $1 ORDER BY started_at DESC"
    ))
    .bind(student_id)
    .fetch_all(pool)
    .await
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ExamAttemptRow {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) student_email: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) tab_switch_count: i32,
    pub(crate) score: Option<i32>,
    pub(crate) total_marks: Option<i32>,
    pub(crate) percentage: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) requires_manual_grading: bool,
    pub(crate) manual_grading_completed: bool,
}

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<ExamAttemptRow>, sqlx::Error> {
    sqlx::query_as::<_, ExamAttemptRow>(
        "SELECT a.id,
                a.student_id,
                u.full_name AS student_name,
                u.email AS student_email,
                a.status,
                a.submitted_at,
                a.tab_switch_count,
                a.score,
                a.total_marks,
                a.percentage,
                a.passed,
                a.requires_manual_grading,
                a.manual_grading_completed
         FROM attempts a
         JOIN users u ON u.id = a.student_id
         WHERE a.exam_id = $1
         ORDER BY a.started_at DESC",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

/// Conditional increment: only an in-progress attempt accumulates focus-loss
/// signals. Returns the updated count, or `None` when the attempt is no
/// longer in progress (or does not exist).
pub(crate) async fn record_focus_loss(
    pool: &PgPool,
    id: &str,
    now: PrimitiveDateTime,
) -> Result<Option<i32>, sqlx::Error> {
    sqlx::query_scalar(
        "UPDATE attempts
         SET tab_switch_count = tab_switch_count + 1, updated_at = $2
         WHERE id = $1 AND status = $3
         RETURNING tab_switch_count",
    )
    .bind(id)
    .bind(now)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(pool)
    .await
}

pub(crate) struct SubmissionOutcome {
    pub(crate) status: AttemptStatus,
    pub(crate) score: Option<i32>,
    pub(crate) total_marks: i32,
    pub(crate) percentage: Option<f64>,
    pub(crate) passed: Option<bool>,
    pub(crate) requires_manual_grading: bool,
}

/// The atomic claim gating the submission write path: the row moves out of
/// `in_progress` exactly once. A concurrent submit matches zero rows and
/// gets `None` back.
pub(crate) async fn claim_submission(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    outcome: &SubmissionOutcome,
    now: PrimitiveDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET status = $2,
             submitted_at = $3,
             score = $4,
             total_marks = $5,
             percentage = $6,
             passed = $7,
             requires_manual_grading = $8,
             manual_grading_completed = FALSE,
             updated_at = $3
         WHERE id = $1 AND status = $9
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(outcome.status)
    .bind(now)
    .bind(outcome.score)
    .bind(outcome.total_marks)
    .bind(outcome.percentage)
    .bind(outcome.passed)
    .bind(outcome.requires_manual_grading)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}

/// Guarded `pending_manual_grading -> grading_completed` transition; runs
/// inside the finalize transaction after every answer is verified graded.
pub(crate) async fn complete_grading(
    executor: impl sqlx::PgExecutor<'_>,
    id: &str,
    score: i32,
    total_marks: i32,
    percentage: f64,
    passed: bool,
    now: PrimitiveDateTime,
) -> Result<Option<Attempt>, sqlx::Error> {
    sqlx::query_as::<_, Attempt>(&format!(
        "UPDATE attempts
         SET status = $2,
             score = $3,
             total_marks = $4,
             percentage = $5,
             passed = $6,
             manual_grading_completed = TRUE,
             updated_at = $7
         WHERE id = $1 AND status = $8
         RETURNING {COLUMNS}"
    ))
    .bind(id)
    .bind(AttemptStatus::GradingCompleted)
    .bind(score)
    .bind(total_marks)
    .bind(percentage)
    .bind(passed)
    .bind(now)
    .bind(AttemptStatus::PendingManualGrading)
    .fetch_optional(executor)
    .await
}

pub(crate) async fn count_submitted_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE exam_id = $1 AND status <> $2")
        .bind(exam_id)
        .bind(AttemptStatus::InProgress)
        .fetch_one(pool)
        .await
}

/// Attempts whose deadline has passed by more than the grace window and
/// which no client ever submitted. The sweeper force-submits these.
pub(crate) async fn list_overdue(
    pool: &PgPool,
    cutoff: PrimitiveDateTime,
    limit: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT id FROM attempts
         WHERE status = $1 AND deadline_at < $2
         ORDER BY deadline_at
         LIMIT $3",
    )
    .bind(AttemptStatus::InProgress)
    .bind(cutoff)
    .bind(limit)
    .fetch_all(pool)
    .await
}
