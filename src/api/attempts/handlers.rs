use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use time::Duration;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Attempt, User};
use crate::db::types::{AttemptStatus, UserRole};
use crate::repositories;
use crate::schemas::attempt::{
    attempt_to_response, AttemptResponse, FocusLossResponse, QuestionView, SubmitRequest,
};
use crate::services::submission::{self, SubmitError};

pub(in crate::api::attempts) async fn start_attempt(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<AttemptResponse>), ApiError> {
    if user.role != UserRole::Student {
        return Err(ApiError::Forbidden("Only students can attempt exams"));
    }

    let exam = repositories::exams::find_by_id(state.db(), &exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    if !exam.is_active {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    // Authored content is not trusted to be well-formed: an attempt only
    // starts against a non-empty, positively-marked question set.
    let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;
    if stats.count == 0 {
        return Err(ApiError::BadRequest("Exam has no questions".to_string()));
    }
    if stats.min_marks < 1 {
        return Err(ApiError::BadRequest("Exam has questions without marks".to_string()));
    }

    let now = primitive_now_utc();
    let deadline = now + Duration::minutes(i64::from(exam.duration_minutes));

    let attempt = repositories::attempts::create(
        state.db(),
        repositories::attempts::CreateAttempt {
            id: &Uuid::new_v4().to_string(),
            exam_id: &exam.id,
            student_id: &user.id,
            started_at: now,
            deadline_at: deadline,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create attempt"))?;

    let Some(attempt) = attempt else {
        return Err(ApiError::Conflict("You have already attempted this exam".to_string()));
    };

    metrics::counter!("attempts_started_total").increment(1);
    tracing::info!(
        attempt_id = %attempt.id,
        exam_id = %exam.id,
        student_id = %user.id,
        deadline_at = %crate::core::time::format_primitive(attempt.deadline_at),
        "Attempt started"
    );

    Ok((StatusCode::CREATED, Json(attempt_to_response(attempt))))
}

pub(in crate::api::attempts) async fn my_attempts(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AttemptResponse>>, ApiError> {
    let attempts = repositories::attempts::list_by_student(state.db(), &user.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list attempts"))?;

    Ok(Json(attempts.into_iter().map(attempt_to_response).collect()))
}

/// Question delivery for an exam-taking client. The response type carries no
/// answer key by construction; a caller without an in-progress attempt gets
/// NotFound.
pub(in crate::api::attempts) async fn attempt_questions(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<QuestionView>>, ApiError> {
    let attempt = fetch_owned_attempt(&state, &attempt_id, &user).await?;

    if attempt.status != AttemptStatus::InProgress {
        return Err(ApiError::NotFound("No active attempt".to_string()));
    }

    let questions = repositories::questions::list_by_exam(state.db(), &attempt.exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch questions"))?;

    Ok(Json(questions.into_iter().map(QuestionView::from).collect()))
}

pub(in crate::api::attempts) async fn focus_loss(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<FocusLossResponse>, ApiError> {
    let attempt = fetch_owned_attempt(&state, &attempt_id, &user).await?;

    let now = primitive_now_utc();
    let updated = repositories::attempts::record_focus_loss(state.db(), &attempt.id, now)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to record focus loss"))?;

    // A signal that lands after submission is dropped, not rejected: the
    // client fires these without awaiting the submit outcome.
    let response = match updated {
        Some(count) => {
            FocusLossResponse { attempt_id: attempt.id, tab_switch_count: count, recorded: true }
        }
        None => FocusLossResponse {
            attempt_id: attempt.id,
            tab_switch_count: attempt.tab_switch_count,
            recorded: false,
        },
    };

    Ok(Json(response))
}

pub(in crate::api::attempts) async fn submit_attempt(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = fetch_owned_attempt(&state, &attempt_id, &user).await?;

    let now = primitive_now_utc();
    let grace = Duration::seconds(state.settings().exam().submit_grace_seconds as i64);

    // Past the grace window the client's answers no longer count; the
    // attempt is closed with whatever the server can vouch for (nothing).
    let answers = if attempt.status == AttemptStatus::InProgress
        && now > attempt.deadline_at + grace
    {
        tracing::warn!(
            attempt_id = %attempt.id,
            deadline_at = %crate::core::time::format_primitive(attempt.deadline_at),
            "Submission received past deadline grace; discarding client answers"
        );
        Vec::new()
    } else {
        payload.answers
    };

    let outcome = submission::submit(state.db(), &attempt.id, &answers, now)
        .await
        .map_err(map_submit_error)?;

    Ok(Json(attempt_to_response(outcome.attempt().clone())))
}

pub(in crate::api::attempts) async fn attempt_result(
    Path(attempt_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let attempt = repositories::attempts::find_by_id(state.db(), &attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))?;

    if attempt.student_id != user.id {
        let exam = repositories::exams::find_by_id(state.db(), &attempt.exam_id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
            .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;
        crate::api::guards::require_exam_instructor(&user, &exam)?;
    }

    if attempt.status == AttemptStatus::InProgress {
        return Err(ApiError::Conflict("Attempt has not been submitted yet".to_string()));
    }

    Ok(Json(attempt_to_response(attempt)))
}

async fn fetch_owned_attempt(
    state: &AppState,
    attempt_id: &str,
    user: &User,
) -> Result<Attempt, ApiError> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))?;

    if attempt.student_id != user.id {
        return Err(ApiError::Forbidden("Access denied"));
    }

    Ok(attempt)
}

fn map_submit_error(err: SubmitError) -> ApiError {
    match err {
        SubmitError::AttemptNotFound => ApiError::NotFound("Attempt not found".to_string()),
        SubmitError::UnknownQuestion(_) | SubmitError::MismatchedAnswer(_) => {
            ApiError::BadRequest(err.to_string())
        }
        SubmitError::ExamNotFound | SubmitError::Db(_) => {
            ApiError::internal(err, "Failed to submit attempt")
        }
    }
}
