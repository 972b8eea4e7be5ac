use axum::{
    extract::{Path, State},
    Json,
};

use crate::api::errors::ApiError;
use crate::api::guards::{require_exam_instructor, CurrentInstructor};
use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::models::{Attempt, Exam, User};
use crate::db::types::{AttemptStatus, QuestionKind};
use crate::repositories;
use crate::schemas::attempt::{attempt_to_response, AttemptResponse};
use crate::schemas::grading::{GradeAnswerRequest, ManualAnswerResponse};
use crate::services::grading;

pub(in crate::api::grading) async fn manual_answers(
    Path(attempt_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (attempt, _) = fetch_gradable_attempt(&state, &attempt_id, &user).await?;

    let rows = repositories::answers::list_manual_by_attempt(state.db(), &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list answers"))?;

    let answers: Vec<ManualAnswerResponse> =
        rows.into_iter().map(ManualAnswerResponse::from).collect();

    Ok(Json(serde_json::json!({
        "attempt": attempt_to_response(attempt),
        "answers": answers,
    })))
}

pub(in crate::api::grading) async fn grade_answer(
    Path(answer_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
    Json(payload): Json<GradeAnswerRequest>,
) -> Result<Json<ManualAnswerResponse>, ApiError> {
    let answer = repositories::answers::find_by_id(state.db(), &answer_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch answer"))?
        .ok_or_else(|| ApiError::NotFound("Answer not found".to_string()))?;

    fetch_gradable_attempt(&state, &answer.attempt_id, &user).await?;

    let question = repositories::questions::find_by_id(state.db(), &answer.question_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question"))?
        .ok_or_else(|| ApiError::NotFound("Question not found".to_string()))?;

    if question.kind != QuestionKind::FreeText {
        return Err(ApiError::BadRequest(
            "Only free-text answers are graded manually".to_string(),
        ));
    }
    if payload.awarded_marks < 0 || payload.awarded_marks > question.marks {
        return Err(ApiError::BadRequest(format!(
            "awarded_marks must be between 0 and {}",
            question.marks
        )));
    }

    // The status check and the write share the attempt row lock, so a
    // finalize racing this grade either sees the new mark or rejects it.
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    let attempt = repositories::attempts::lock_by_id(&mut *tx, &answer.attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to lock attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))?;

    if attempt.status != AttemptStatus::PendingManualGrading {
        return Err(ApiError::Conflict(
            "Attempt is not awaiting manual grading".to_string(),
        ));
    }

    let graded = repositories::answers::grade(
        &mut *tx,
        &answer.id,
        payload.awarded_marks,
        &user.id,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to grade answer"))?
    .ok_or_else(|| ApiError::NotFound("Answer not found".to_string()))?;

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit transaction"))?;

    tracing::info!(
        answer_id = %graded.id,
        attempt_id = %attempt.id,
        awarded_marks = payload.awarded_marks,
        grader_id = %user.id,
        "Answer graded"
    );

    Ok(Json(ManualAnswerResponse {
        id: graded.id,
        question_id: graded.question_id,
        question_text: question.question_text,
        max_marks: question.marks,
        response_text: graded.response_text,
        is_graded: graded.is_graded,
        awarded_marks: graded.awarded_marks,
    }))
}

/// Closes out manual grading once every answer carries a mark. Concurrent
/// finalizes serialize on the row lock; the loser observes the completed
/// state and returns it unchanged.
pub(in crate::api::grading) async fn finalize_grading(
    Path(attempt_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
) -> Result<Json<AttemptResponse>, ApiError> {
    let (_, exam) = fetch_gradable_attempt(&state, &attempt_id, &user).await?;

    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    let attempt = repositories::attempts::lock_by_id(&mut *tx, &attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to lock attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))?;

    if attempt.status == AttemptStatus::GradingCompleted {
        tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit transaction"))?;
        return Ok(Json(attempt_to_response(attempt)));
    }
    if attempt.status != AttemptStatus::PendingManualGrading {
        return Err(ApiError::Conflict(
            "Attempt is not awaiting manual grading".to_string(),
        ));
    }

    let ungraded = repositories::answers::count_ungraded(&mut *tx, &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count ungraded answers"))?;
    if ungraded > 0 {
        return Err(ApiError::Conflict(format!(
            "{ungraded} answer(s) still ungraded; grade every answer before finalizing"
        )));
    }

    let score = repositories::answers::sum_awarded(&mut *tx, &attempt.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to sum awarded marks"))?;
    let total_marks = repositories::questions::sum_marks(&mut *tx, &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to sum question marks"))?;

    let summary = grading::aggregate(score as i32, total_marks as i32, exam.passing_marks);

    let finalized = repositories::attempts::complete_grading(
        &mut *tx,
        &attempt.id,
        summary.score,
        summary.total_marks,
        summary.percentage,
        summary.passed,
        primitive_now_utc(),
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to finalize grading"))?
    .ok_or_else(|| {
        ApiError::Conflict("Attempt is not awaiting manual grading".to_string())
    })?;

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit transaction"))?;

    metrics::counter!("grading_finalized_total").increment(1);
    tracing::info!(
        attempt_id = %finalized.id,
        score = summary.score,
        total_marks = summary.total_marks,
        passed = summary.passed,
        "Manual grading finalized"
    );

    Ok(Json(attempt_to_response(finalized)))
}

/// Resolves the attempt and its exam, requiring the caller to be the exam's
/// instructor and the attempt to be submitted.
async fn fetch_gradable_attempt(
    state: &AppState,
    attempt_id: &str,
    user: &User,
) -> Result<(Attempt, Exam), ApiError> {
    let attempt = repositories::attempts::find_by_id(state.db(), attempt_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch attempt"))?
        .ok_or_else(|| ApiError::NotFound("Attempt not found".to_string()))?;

    let exam = repositories::exams::find_by_id(state.db(), &attempt.exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    require_exam_instructor(user, &exam)?;

    if attempt.status == AttemptStatus::InProgress {
        return Err(ApiError::Conflict("Attempt has not been submitted yet".to_string()));
    }

    Ok((attempt, exam))
}
