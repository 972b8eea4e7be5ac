mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/exams/:exam_id/start", post(handlers::start_attempt))
        .route("/mine", get(handlers::my_attempts))
        .route("/:attempt_id/questions", get(handlers::attempt_questions))
        .route("/:attempt_id/focus-loss", post(handlers::focus_loss))
        .route("/:attempt_id/submit", post(handlers::submit_attempt))
        .route("/:attempt_id/result", get(handlers::attempt_result))
}

#[cfg(test)]
mod tests;
