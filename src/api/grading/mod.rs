mod handlers;

use axum::{routing::get, routing::post, routing::put, Router};

use crate::core::state::AppState;

/// Grader routes, nested under `/tests`. Every handler checks that the
/// caller manages the test's company.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:test_id/grading/queue", get(handlers::queue))
        .route(
            "/:test_id/grading/attempts/:attempt_id/questions/:question_id",
            put(handlers::grade_answer),
        )
        .route("/:test_id/grading/questions/:question_id/bulk", post(handlers::bulk_grade))
        .route("/:test_id/grading/finalize", post(handlers::finalize))
        .route("/:test_id/grading/standings", post(handlers::recompute_standings))
        .route("/:test_id/results.csv", get(handlers::export_csv))
}
