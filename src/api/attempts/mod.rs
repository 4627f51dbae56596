mod handlers;

use axum::{routing::get, routing::post, routing::put, Router};

use crate::core::state::AppState;

/// Student routes, nested under `/tests`.
pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/:test_id/attempts", post(handlers::start_attempt))
        .route("/:test_id/attempts/current", get(handlers::current_session))
        .route("/:test_id/attempts/current/answers/:question_id", put(handlers::save_answer))
        .route("/:test_id/attempts/current/flags/:question_id", put(handlers::flag_question))
        .route("/:test_id/attempts/current/sections/:index/start", post(handlers::start_section))
        .route("/:test_id/attempts/current/submit", post(handlers::submit))
        .route("/:test_id/result", get(handlers::result))
}

#[cfg(test)]
mod tests;
