use axum::extract::{Path, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::guards::CurrentUser;
use crate::core::state::AppState;
use crate::schemas::grading::{
    BulkGradeRequest, BulkGradeResponse, FinalizeResponse, GradeRequest, GradedAnswerResponse,
    GradingQueueResponse, StandingsResponse,
};

pub(super) async fn queue(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<GradingQueueResponse>, ApiError> {
    let queue = state.engine().ungraded_answers(&test_id, &user.email).await?;
    Ok(Json(queue.into()))
}

pub(super) async fn grade_answer(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, attempt_id, question_id)): Path<(String, String, String)>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<GradedAnswerResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::validation(e.to_string()))?;

    let graded = state
        .engine()
        .grade_answer(
            &test_id,
            &attempt_id,
            &question_id,
            payload.marks,
            payload.feedback.as_deref(),
            &user.email,
        )
        .await?;
    Ok(Json(graded.into()))
}

pub(super) async fn bulk_grade(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path((test_id, question_id)): Path<(String, String)>,
    Json(payload): Json<BulkGradeRequest>,
) -> Result<Json<BulkGradeResponse>, ApiError> {
    payload.validate().map_err(|e| ApiError::validation(e.to_string()))?;

    let items = payload.into_items();
    let report =
        state.engine().bulk_grade_question(&test_id, &question_id, &items, &user.email).await?;

    if !report.failures.is_empty() {
        tracing::warn!(
            test_id = %test_id,
            question_id = %question_id,
            graded = report.graded.len(),
            failed = report.failures.len(),
            "Bulk grading finished with failures"
        );
    }
    Ok(Json(report.into()))
}

pub(super) async fn finalize(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<FinalizeResponse>, ApiError> {
    let report = state.engine().finalize_grading(&test_id, &user.email).await?;
    Ok(Json(report.into()))
}

pub(super) async fn recompute_standings(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<StandingsResponse>, ApiError> {
    let standings = state.engine().recompute_standings(&test_id, &user.email).await?;
    Ok(Json(standings.into()))
}

pub(super) async fn export_csv(
    CurrentUser(user): CurrentUser,
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let csv = state.engine().export_results_csv(&test_id, &user.email).await?;
    let disposition = format!("attachment; filename=\"{}-results.csv\"", sanitize_filename(&test_id));

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}

fn sanitize_filename(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
