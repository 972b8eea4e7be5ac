use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::{require_exam_instructor, CurrentInstructor, CurrentUser};
use crate::core::state::AppState;
use crate::core::time::{format_primitive, primitive_now_utc};
use crate::db::models::Exam;
use crate::db::types::UserRole;
use crate::repositories;
use crate::schemas::exam::{exam_to_response, ExamCreate, ExamResponse, QuestionCreate};

pub(in crate::api::exams) async fn create_exam(
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
    Json(payload): Json<ExamCreate>,
) -> Result<(StatusCode, Json<ExamResponse>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    for question in &payload.questions {
        question.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;
    }

    let total_marks: i64 = payload.questions.iter().map(|question| i64::from(question.marks())).sum();
    if !payload.questions.is_empty() && i64::from(payload.passing_marks) > total_marks {
        return Err(ApiError::BadRequest(
            "passing_marks cannot exceed the sum of question marks".to_string(),
        ));
    }

    let now = primitive_now_utc();
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;

    let exam_id = Uuid::new_v4().to_string();
    let exam = repositories::exams::create(
        &mut *tx,
        repositories::exams::CreateExam {
            id: &exam_id,
            title: &payload.title,
            description: payload.description.as_deref(),
            duration_minutes: payload.duration_minutes,
            passing_marks: payload.passing_marks,
            is_active: false,
            created_by: &user.id,
            created_at: now,
            updated_at: now,
        },
    )
    .await
    .map_err(|e| ApiError::internal(e, "Failed to create exam"))?;

    let question_count = payload.questions.len() as i64;
    for (position, question) in payload.questions.iter().enumerate() {
        insert_question(&mut tx, &exam.id, question, position as i32, now).await?;
    }

    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit transaction"))?;

    Ok((StatusCode::CREATED, Json(exam_to_response(exam, total_marks, question_count))))
}

pub(in crate::api::exams) async fn list_exams(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<ExamResponse>>, ApiError> {
    let exams = match user.role {
        UserRole::Instructor => repositories::exams::list_by_creator(state.db(), &user.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list exams"))?,
        UserRole::Student => repositories::exams::list_active(state.db())
            .await
            .map_err(|e| ApiError::internal(e, "Failed to list exams"))?,
    };

    let mut responses = Vec::with_capacity(exams.len());
    for exam in exams {
        let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
            .await
            .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;
        responses.push(exam_to_response(exam, stats.total_marks, stats.count));
    }

    Ok(Json(responses))
}

pub(in crate::api::exams) async fn get_exam(
    Path(exam_id): Path<String>,
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;

    let is_owner = user.role == UserRole::Instructor && exam.created_by == user.id;
    if !is_owner && !exam.is_active {
        return Err(ApiError::NotFound("Exam not found".to_string()));
    }

    let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;

    Ok(Json(exam_to_response(exam, stats.total_marks, stats.count)))
}

pub(in crate::api::exams) async fn activate_exam(
    Path(exam_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_instructor(&user, &exam)?;

    // An exam only opens for attempts once its question set can be scored.
    let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;
    if stats.count == 0 {
        return Err(ApiError::BadRequest("Exam has no questions".to_string()));
    }
    if stats.min_marks < 1 {
        return Err(ApiError::BadRequest("Every question must be worth at least 1 mark".to_string()));
    }
    if i64::from(exam.passing_marks) > stats.total_marks {
        return Err(ApiError::BadRequest(
            "passing_marks cannot exceed the sum of question marks".to_string(),
        ));
    }

    set_active(&state, &exam.id, true, stats.total_marks, stats.count).await
}

pub(in crate::api::exams) async fn deactivate_exam(
    Path(exam_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
) -> Result<Json<ExamResponse>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_instructor(&user, &exam)?;

    let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;

    set_active(&state, &exam.id, false, stats.total_marks, stats.count).await
}

pub(in crate::api::exams) async fn add_question(
    Path(exam_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
    Json(payload): Json<QuestionCreate>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_instructor(&user, &exam)?;

    // Mutating the question set after anyone has submitted would silently
    // corrupt historical scores.
    let submitted = repositories::attempts::count_submitted_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count attempts"))?;
    if submitted > 0 {
        return Err(ApiError::Conflict(
            "Question set is frozen: attempts have already been submitted".to_string(),
        ));
    }

    let stats = repositories::questions::stats_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch question stats"))?;

    let now = primitive_now_utc();
    let mut tx = state
        .db()
        .begin()
        .await
        .map_err(|e| ApiError::internal(e, "Failed to start transaction"))?;
    let question = insert_question(&mut tx, &exam.id, &payload, stats.count as i32, now).await?;
    tx.commit().await.map_err(|e| ApiError::internal(e, "Failed to commit transaction"))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Question added successfully",
            "question_id": question.id
        })),
    ))
}

pub(in crate::api::exams) async fn list_exam_attempts(
    Path(exam_id): Path<String>,
    CurrentInstructor(user): CurrentInstructor,
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let exam = fetch_exam(&state, &exam_id).await?;
    require_exam_instructor(&user, &exam)?;

    let rows = repositories::attempts::list_by_exam(state.db(), &exam.id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to list attempts"))?;

    let items: Vec<serde_json::Value> = rows
        .into_iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id,
                "student_id": row.student_id,
                "student_name": row.student_name,
                "student_email": row.student_email,
                "status": row.status,
                "submitted_at": row.submitted_at.map(format_primitive),
                "tab_switch_count": row.tab_switch_count,
                "score": row.score,
                "total_marks": row.total_marks,
                "percentage": row.percentage,
                "passed": row.passed,
                "requires_manual_grading": row.requires_manual_grading,
                "manual_grading_completed": row.manual_grading_completed,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({ "items": items })))
}

async fn fetch_exam(state: &AppState, exam_id: &str) -> Result<Exam, ApiError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to fetch exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))
}

async fn set_active(
    state: &AppState,
    exam_id: &str,
    is_active: bool,
    total_marks: i64,
    question_count: i64,
) -> Result<Json<ExamResponse>, ApiError> {
    let updated = repositories::exams::set_active(state.db(), exam_id, is_active, primitive_now_utc())
        .await
        .map_err(|e| ApiError::internal(e, "Failed to update exam"))?
        .ok_or_else(|| ApiError::NotFound("Exam not found".to_string()))?;

    Ok(Json(exam_to_response(updated, total_marks, question_count)))
}

async fn insert_question(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    exam_id: &str,
    payload: &QuestionCreate,
    position: i32,
    now: time::PrimitiveDateTime,
) -> Result<crate::db::models::Question, ApiError> {
    let question_id = Uuid::new_v4().to_string();
    let create = match payload {
        QuestionCreate::SingleChoice(choice) => repositories::questions::CreateQuestion {
            id: &question_id,
            exam_id,
            question_text: &choice.question_text,
            kind: crate::db::types::QuestionKind::SingleChoice,
            options: Some([
                choice.option_a.as_str(),
                choice.option_b.as_str(),
                choice.option_c.as_str(),
                choice.option_d.as_str(),
            ]),
            correct_option: Some(choice.correct_option),
            marks: choice.marks,
            position,
            created_at: now,
            updated_at: now,
        },
        QuestionCreate::FreeText(free_text) => repositories::questions::CreateQuestion {
            id: &question_id,
            exam_id,
            question_text: &free_text.question_text,
            kind: crate::db::types::QuestionKind::FreeText,
            options: None,
            correct_option: None,
            marks: free_text.marks,
            position,
            created_at: now,
            updated_at: now,
        },
    };

    repositories::questions::create(&mut **tx, create)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to create question"))
}
