mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::create_exam).get(handlers::list_exams))
        .route("/:exam_id", get(handlers::get_exam))
        .route("/:exam_id/activate", post(handlers::activate_exam))
        .route("/:exam_id/deactivate", post(handlers::deactivate_exam))
        .route("/:exam_id/questions", post(handlers::add_question))
        .route("/:exam_id/attempts", get(handlers::list_exam_attempts))
}
