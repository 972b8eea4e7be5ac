mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/attempts/:attempt_id", get(handlers::manual_answers))
        .route("/answers/:answer_id", post(handlers::grade_answer))
        .route("/attempts/:attempt_id/finalize", post(handlers::finalize_grading))
}

#[cfg(test)]
mod tests;
