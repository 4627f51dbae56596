use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::schemas::attempt::{
    AnswerRequest, AnswerResponse, AttemptSessionResponse, FlagRequest, FlagResponse,
    ResultResponse, SubmitResponse,
};

pub(super) async fn start_attempt(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<(StatusCode, Json<AttemptSessionResponse>), ApiError> {
    let outcome = state.engine().start_attempt(&test_id, &user.id).await?;

    let status = if outcome.resumed { StatusCode::OK } else { StatusCode::CREATED };
    Ok((status, Json(AttemptSessionResponse::from_view(&outcome.session, outcome.resumed))))
}

pub(super) async fn current_session(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<AttemptSessionResponse>, ApiError> {
    let view = state.engine().get_session(&test_id, &user.id).await?;
    Ok(Json(AttemptSessionResponse::from_view(&view, true)))
}

pub(super) async fn save_answer(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, question_id)): Path<(String, String)>,
    Json(payload): Json<AnswerRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
    let outcome =
        state.engine().save_answer(&test_id, &user.id, &question_id, payload.answer).await?;
    Ok(Json(outcome.into()))
}

pub(super) async fn flag_question(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, question_id)): Path<(String, String)>,
    Json(payload): Json<FlagRequest>,
) -> Result<Json<FlagResponse>, ApiError> {
    let outcome =
        state.engine().flag_question(&test_id, &user.id, &question_id, payload.flagged).await?;
    Ok(Json(outcome.into()))
}

pub(super) async fn start_section(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, index)): Path<(String, i32)>,
) -> Result<Json<AttemptSessionResponse>, ApiError> {
    let view = state.engine().advance_section(&test_id, &user.id, index).await?;
    Ok(Json(AttemptSessionResponse::from_view(&view, true)))
}

pub(super) async fn submit(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let outcome = state.engine().submit(&test_id, &user.id).await?;
    if outcome.already_closed {
        tracing::info!(
            test_id = %test_id,
            student_id = %user.id,
            attempt_id = %outcome.attempt.id,
            "Submit received for an attempt that was already closed"
        );
    }
    Ok(Json(outcome.into()))
}

pub(super) async fn result(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<ResultResponse>, ApiError> {
    let view = state.engine().get_result(&test_id, &user.id).await?;
    Ok(Json(view.into()))
}
