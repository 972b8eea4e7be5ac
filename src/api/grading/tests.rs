use axum::http::{Method, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::db::types::ChoiceOption;
use crate::test_support::{self, TestContext};

struct Fixture {
    instructor_token: String,
    attempt_id: String,
    answer_id: String,
}

/// Submitted attempt awaiting manual grading: one correct 40-mark choice
/// answer plus one ungraded 60-mark free-text answer, passing at 50.
async fn pending_attempt_fixture(ctx: &TestContext) -> Fixture {
    let instructor = test_support::insert_instructor(ctx.state.db(), "grader@example.com").await;
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
        "Explain move semantics.",
        60,
        1,
    )
    .await;

    let student_token = test_support::bearer_token(&student.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/attempts/exams/{}/start", exam.id),
            Some(&student_token),
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
            Some(&student_token),
            Some(json!({
                "answers": [
                    { "question_id": choice.id, "selected_option": "A" },
                    { "question_id": free_text.id, "response_text": "Moves transfer ownership." }
                ]
            })),
        ))
        .await
        .expect("submit attempt");
    let status = response.status();
    let submitted = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {submitted}");
    assert_eq!(submitted["status"], "pending_manual_grading");

    let instructor_token = test_support::bearer_token(&instructor.id, ctx.state.settings());
    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::GET,
            &format!("/api/v1/grading/attempts/{attempt_id}"),
            Some(&instructor_token),
            None,
        ))
        .await
        .expect("list manual answers");
    let status = response.status();
    let body = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {body}");
    let answers = body["answers"].as_array().expect("answer list");
    assert_eq!(answers.len(), 1, "only the free-text answer needs a grader");
    let answer_id = answers[0]["id"].as_str().expect("answer id").to_string();

    Fixture { instructor_token, attempt_id, answer_id }
}

#[tokio::test]
async fn grade_and_finalize_computes_the_score() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/answers/{}", fixture.answer_id),
            Some(&fixture.instructor_token),
            Some(json!({ "awarded_marks": 30 })),
        ))
        .await
        .expect("grade answer");
    let status = response.status();
    let graded = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {graded}");
    assert_eq!(graded["is_graded"], true);
    assert_eq!(graded["awarded_marks"], 30);

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/attempts/{}/finalize", fixture.attempt_id),
            Some(&fixture.instructor_token),
            None,
        ))
        .await
        .expect("finalize grading");
    let status = response.status();
    let finalized = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {finalized}");
    assert_eq!(finalized["status"], "grading_completed");
    assert_eq!(finalized["score"], 70);
    assert_eq!(finalized["total_marks"], 100);
    assert_eq!(finalized["percentage"], 70.0);
    assert_eq!(finalized["passed"], true);
    assert_eq!(finalized["manual_grading_completed"], true);
}

#[tokio::test]
async fn finalize_requires_every_answer_graded() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/attempts/{}/finalize", fixture.attempt_id),
            Some(&fixture.instructor_token),
            None,
        ))
        .await
        .expect("finalize grading");

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn awarded_marks_must_stay_within_question_marks() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    for marks in [-1, 61] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/grading/answers/{}", fixture.answer_id),
                Some(&fixture.instructor_token),
                Some(json!({ "awarded_marks": marks })),
            ))
            .await
            .expect("grade answer");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "marks = {marks}");
    }

    // Boundary values are fine.
    for marks in [0, 60] {
        let response = ctx
            .app
            .clone()
            .oneshot(test_support::json_request(
                Method::POST,
                &format!("/api/v1/grading/answers/{}", fixture.answer_id),
                Some(&fixture.instructor_token),
                Some(json!({ "awarded_marks": marks })),
            ))
            .await
            .expect("grade answer");

        assert_eq!(response.status(), StatusCode::OK, "marks = {marks}");
    }
}

#[tokio::test]
async fn double_finalize_is_a_noop() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/answers/{}", fixture.answer_id),
            Some(&fixture.instructor_token),
            Some(json!({ "awarded_marks": 45 })),
        ))
        .await
        .expect("grade answer");
    assert_eq!(response.status(), StatusCode::OK);

    let finalize = || {
        test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/attempts/{}/finalize", fixture.attempt_id),
            Some(&fixture.instructor_token),
            None,
        )
    };

    let response = ctx.app.clone().oneshot(finalize()).await.expect("first finalize");
    let first = test_support::read_json(response).await;

    let response = ctx.app.clone().oneshot(finalize()).await.expect("second finalize");
    let status = response.status();
    let second = test_support::read_json(response).await;
    assert_eq!(status, StatusCode::OK, "response: {second}");

    assert_eq!(first["status"], "grading_completed");
    assert_eq!(first["score"], second["score"]);
    assert_eq!(first["percentage"], second["percentage"]);
}

#[tokio::test]
async fn grading_is_rejected_once_the_attempt_is_finalized() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    let grade = |marks: i32| {
        test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/answers/{}", fixture.answer_id),
            Some(&fixture.instructor_token),
            Some(json!({ "awarded_marks": marks })),
        )
    };

    let response = ctx.app.clone().oneshot(grade(30)).await.expect("grade answer");
    assert_eq!(response.status(), StatusCode::OK);

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/attempts/{}/finalize", fixture.attempt_id),
            Some(&fixture.instructor_token),
            None,
        ))
        .await
        .expect("finalize grading");
    assert_eq!(response.status(), StatusCode::OK);

    // A grade arriving after finalization must not mutate the answer set
    // behind the recorded score.
    let response = ctx.app.clone().oneshot(grade(60)).await.expect("late grade");
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let awarded: Option<i32> = sqlx::query_scalar("SELECT awarded_marks FROM answers WHERE id = $1")
        .bind(&fixture.answer_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("awarded marks");
    assert_eq!(awarded, Some(30));

    let score: Option<i32> = sqlx::query_scalar("SELECT score FROM attempts WHERE id = $1")
        .bind(&fixture.attempt_id)
        .fetch_one(ctx.state.db())
        .await
        .expect("attempt score");
    assert_eq!(score, Some(70));
}

#[tokio::test]
async fn only_the_exam_instructor_may_grade() {
    let ctx = test_support::setup_test_context().await;
    let fixture = pending_attempt_fixture(&ctx).await;

    let outsider = test_support::insert_instructor(ctx.state.db(), "other@example.com").await;
    let outsider_token = test_support::bearer_token(&outsider.id, ctx.state.settings());

    let response = ctx
        .app
        .clone()
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/answers/{}", fixture.answer_id),
            Some(&outsider_token),
            Some(json!({ "awarded_marks": 10 })),
        ))
        .await
        .expect("grade answer");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .app
        .oneshot(test_support::json_request(
            Method::POST,
            &format!("/api/v1/grading/attempts/{}/finalize", fixture.attempt_id),
            Some(&outsider_token),
            None,
        ))
        .await
        .expect("finalize grading");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
