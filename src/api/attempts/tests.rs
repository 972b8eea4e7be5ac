use axum::http::{Method, StatusCode};
use serde_json::json;
use time::Duration;
use tower::ServiceExt;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Exam, Question, User};
use crate::db::types::ChoiceOption;
use crate::tasks::deadlines;
use crate::test_support::{self, TestContext};

struct Fixture {
    student: User,
    student_token: String,
    exam: Exam,
    questions: Vec<Question>,
}

/// Active exam worth 100 marks (45 + 55), passing at 40, both single-choice.
async fn choice_exam_fixture(ctx: &TestContext) -> Fixture {
    let instructor = test_support::insert_instructor(ctx.state.db(), "creator@example.com").await;
    let student = test_support::insert_student(ctx.state.db(), "student@example.com").await;
    let exam =
        test_support::insert_exam(ctx.state.db(), "Choice exam", &instructor.id, 40, true).await;
    let first = test_support::insert_choice_question(
        ctx.state.db(),
        &exam.id,
        "First question",
        ChoiceOption::A,
        45,
        0,
    )
    .await;
    let second = test_support::insert_choice_question(
        ctx.state.db(),
        &exam.id,
        "Second question",
        ChoiceOption::C,
        55,
        1,
    )
    .await;

    let student_token = test_support::bearer_token(&student.id, ctx.state.settings());
    Fixture { student, student_token, exam, questions: vec![first, second] }
}

async fn start_attempt(ctx: &TestContext, fixture: &Fixture) -> String {
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/exams/{}/start", fixture.exam.id),
            Some(&fixture.student_token),
            None,
        ))
        .await
        .expect("start attempt");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::CREATED, "response: {body}");
    assert_eq!(body["status"], "in_progress");
    body["id"].as_str().expect("attempt id").to_string()
}

async fn backdate_deadline(ctx: &TestContext, attempt_id: &str, minutes: i64) {
    let past = primitive_now_utc() - Duration::minutes(minutes);
    sqlx::query("UPDATE attempts SET deadline_at = $1 WHERE id = $2")
        .bind(past)
        .bind(attempt_id)
        .execute(ctx.state.db())
        .await
        .expect("backdate deadline");
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;

    let _attempt_id = start_attempt(&ctx, &fixture).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/exams/{}/start", fixture.exam.id),
            Some(&fixture.student_token),
            None,
        ))
        .await
        .expect("second start");

    assert_eq!(response.status(), StatusCode::CONFLICT);

    let attempts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM attempts WHERE student_id = $1")
        .bind(&fixture.student.id)
        .fetch_one(ctx.state.db())
        .await
        .expect("count attempts");
    assert_eq!(attempts, 1);
}

#[tokio::test]
async fn inactive_exam_cannot_be_started() {
    let ctx = test_support::setup_test_context().await;

    let instructor = test_support::insert_instructor(ctx.state.db(), "creator@example.com").await;
    let student = test_support::insert_student(ctx.state.db(), "student@example.com").await;
    let exam =
        test_support::insert_exam(ctx.state.db(), "Draft exam", &instructor.id, 10, false).await;
    test_support::insert_choice_question(
        ctx.state.db(),
        &exam.id,
        "Pick A",
        ChoiceOption::A,
        10,
        0,
    )
    .await;

    let token = test_support::bearer_token(&student.id, ctx.state.settings());
    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/exams/{}/start", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delivered_questions_never_contain_the_answer_key() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/attempts/{attempt_id}/questions"),
            Some(&fixture.student_token),
            None,
        ))
        .await
        .expect("fetch questions");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");

    let questions = body.as_array().expect("question list");
    assert_eq!(questions.len(), 2);
    assert_eq!(questions[0]["kind"], "single_choice");
    assert_eq!(questions[0]["option_a"], "Option A");

    let raw = serde_json::to_string(&body).expect("serialize");
    assert!(!raw.contains("correct"), "answer key leaked: {raw}");
}

#[tokio::test]
async fn submit_auto_grades_against_the_server_key() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    // Correct on the 45-mark question, wrong on the 55-mark one.
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({
                "answers": [
                    { "question_id": fixture.questions[0].id, "selected_option": "A" },
                    { "question_id": fixture.questions[1].id, "selected_option": "B" }
                ]
            })),
        ))
        .await
        .expect("submit attempt");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["status"], "auto_graded");
    assert_eq!(body["score"], 45);
    assert_eq!(body["total_marks"], 100);
    assert_eq!(body["percentage"], 45.0);
    assert_eq!(body["passed"], true);
    assert_eq!(body["requires_manual_grading"], false);
}

#[tokio::test]
async fn double_submit_is_a_noop() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    let submit = |answers: serde_json::Value| {
        test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({ "answers": answers })),
        )
    };

    let response = ctx
        .app
        .clone()
        .oneshot(submit(json!([
            { "question_id": fixture.questions[0].id, "selected_option": "A" }
        ])))
        .await
        .expect("first submit");
    let first = test_support::read_json(response).await;

    // The second submit carries different answers; none of them land.
    let response = ctx
        .app
        .clone()
        .oneshot(submit(json!([
            { "question_id": fixture.questions[0].id, "selected_option": "B" },
            { "question_id": fixture.questions[1].id, "selected_option": "C" }
        ])))
        .await
        .expect("second submit");
    let status = response.status();
    let second = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {second}");

    assert_eq!(first["score"], second["score"]);
    assert_eq!(first["submitted_at"], second["submitted_at"]);

    let answers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE attempt_id = $1")
        .bind(&attempt_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("count answers");
    assert_eq!(answers, 2, "one answer row per question, written exactly once");
}

#[tokio::test]
async fn focus_loss_counts_until_submission() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    let focus_loss = || {
        test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/focus-loss"),
            Some(&fixture.student_token),
            None,
        )
    };

    for expected in 1..=2 {
        let response = ctx.app.clone().oneshot(focus_loss()).await.expect("focus loss");
        let status = response.status();
        let body = test_support::read_json(response).await;
        assert_eq!(status, StatusCode::OK, "response: {body}");
        assert_eq!(body["tab_switch_count"], expected);
        assert_eq!(body["recorded"], true);
    }

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({ "answers": [] })),
        ))
        .await
        .expect("submit attempt");
    assert_eq!(response.status(), StatusCode::OK);

    // Late signals are acknowledged but no longer counted.
    let response = ctx.app.clone().oneshot(focus_loss()).await.expect("late focus loss");
    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["tab_switch_count"], 2);
    assert_eq!(body["recorded"], false);
}

#[tokio::test]
async fn free_text_answers_defer_to_manual_grading() {
    let ctx = test_support::setup_test_context().await;

    let instructor = test_support::insert_instructor(ctx.state.db(), "creator@example.com").await;
    let student = test_support::insert_student(ctx.state.db(), "student@example.com").await;
    let exam =
        test_support::insert_exam(ctx.state.db(), "Mixed exam", &instructor.id, 50, true).await;
    let choice = test_support::insert_choice_question(
        ctx.state.db(),
        &exam.id,
        "Pick A",
        ChoiceOption::A,
        40,
        0,
    )
    .await;
    let free_text = test_support::insert_free_text_question(
        ctx.state.db(),
        &exam.id,
        "Explain lifetimes.",
        60,
        1,
    )
    .await;

    let token = test_support::bearer_token(&student.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/exams/{}/start", exam.id),
            Some(&token),
            None,
        ))
        .await
        .expect("start attempt");
    let body = test_support::read_json(response).await;
    let attempt_id = body["id"].as_str().expect("attempt id").to_string();

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&token),
            Some(json!({
                "answers": [
                    { "question_id": choice.id, "selected_option": "A" },
                    { "question_id": free_text.id, "response_text": "They bound borrows." }
                ]
            })),
        ))
        .await
        .expect("submit attempt");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["status"], "pending_manual_grading");
    assert_eq!(body["requires_manual_grading"], true);
    assert!(body["score"].is_null());
    assert!(body["percentage"].is_null());
    assert!(body["passed"].is_null());
}

#[tokio::test]
async fn sweeper_force_submits_overdue_attempts() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    // Well past the deadline plus the default 5-minute grace window.
    backdate_deadline(&ctx, &attempt_id, 10).await;

    deadlines::sweep_overdue_attempts(&ctx.state).await.expect("sweep");

    let status: String = sqlx::query_scalar("SELECT status::text FROM attempts WHERE id = $1")
        .bind(&attempt_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("attempt status");
    assert_eq!(status, "auto_graded");

    let (score, passed): (Option<i32>, Option<bool>) =
        sqlx::query_as("SELECT score, passed FROM attempts WHERE id = $1")
            .bind(&attempt_id)
            .fetch_one(ctx.state.db())
            .await
            .expect("attempt totals");
    assert_eq!(score, Some(0));
    assert_eq!(passed, Some(false));

    // The forced close records one empty answer row per question.
    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answers WHERE attempt_id = $1 AND selected_option IS NOT NULL",
    )
    .bind(&attempt_id)
    .fetch_one(ctx.state.db())
    .await
    .expect("answered count");
    assert_eq!(answered, 0);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM answers WHERE attempt_id = $1")
        .bind(&attempt_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("answer count");
    assert_eq!(total, 2);
}

#[tokio::test]
async fn submission_past_the_grace_window_discards_client_answers() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    backdate_deadline(&ctx, &attempt_id, 10).await;

    // Both answers would be correct, but they arrive too late to count.
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({
                "answers": [
                    { "question_id": fixture.questions[0].id, "selected_option": "A" },
                    { "question_id": fixture.questions[1].id, "selected_option": "C" }
                ]
            })),
        ))
        .await
        .expect("late submit");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["status"], "auto_graded");
    assert_eq!(body["score"], 0);
    assert_eq!(body["passed"], false);

    let answered: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM answers WHERE attempt_id = $1 AND selected_option IS NOT NULL",
    )
    .bind(&attempt_id)
    .fetch_one(ctx.state.db())
    .await
    .expect("answered count");
    assert_eq!(answered, 0);
}

#[tokio::test]
async fn submission_within_the_grace_window_keeps_answers() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    // One minute past the deadline, well inside the 5-minute grace window.
    backdate_deadline(&ctx, &attempt_id, 1).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({
                "answers": [
                    { "question_id": fixture.questions[0].id, "selected_option": "A" },
                    { "question_id": fixture.questions[1].id, "selected_option": "C" }
                ]
            })),
        ))
        .await
        .expect("grace submit");

    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    assert_eq!(body["score"], 100);
    assert_eq!(body["passed"], true);
}

#[tokio::test]
async fn mismatched_answer_payload_is_rejected() {
    let ctx = test_support::setup_test_context().await;
    let fixture = choice_exam_fixture(&ctx).await;
    let attempt_id = start_attempt(&ctx, &fixture).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/{attempt_id}/submit"),
            Some(&fixture.student_token),
            Some(json!({
                "answers": [
                    { "question_id": fixture.questions[0].id, "response_text": "free text for a choice question" }
                ]
            })),
        ))
        .await
        .expect("submit attempt");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
