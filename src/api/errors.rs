use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::engine::EngineError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
    code: &'static str,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    Unauthorized(&'static str),
    Forbidden { code: &'static str, detail: String },
    BadRequest { code: &'static str, detail: String },
    NotFound(String),
    Conflict { code: &'static str, detail: String },
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn validation(detail: impl Into<String>) -> Self {
        Self::BadRequest { code: "validation_error", detail: detail.into() }
    }

    fn parts(self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, "unauthorized", message.to_string())
            }
            ApiError::Forbidden { code, detail } => (StatusCode::FORBIDDEN, code, detail),
            ApiError::BadRequest { code, detail } => (StatusCode::BAD_REQUEST, code, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "not_found", detail),
            ApiError::Conflict { code, detail } => (StatusCode::CONFLICT, code, detail),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", "Internal server error".to_string())
            }
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        let code = err.code();
        match err {
            EngineError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            EngineError::NotManager { .. } | EngineError::ReviewNotAllowed { .. } => {
                ApiError::Forbidden { code, detail: err.to_string() }
            }
            EngineError::InvalidState(_)
            | EngineError::AttemptClosed { .. }
            | EngineError::SectionMismatch { .. }
            | EngineError::IncompleteGrading { .. } => {
                ApiError::Conflict { code, detail: err.to_string() }
            }
            EngineError::AttemptLimitExceeded { .. }
            | EngineError::CannotSkipSections { .. }
            | EngineError::MarksOutOfRange { .. }
            | EngineError::InvalidAnswer { .. } => {
                ApiError::BadRequest { code, detail: err.to_string() }
            }
            EngineError::Internal(context) => ApiError::Internal(context),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let unauthorized = matches!(self, ApiError::Unauthorized(_));
        let (status, code, detail) = self.parts();

        let mut response =
            (status, Json(ErrorResponse { status: status.as_u16(), detail, code })).into_response();
        if unauthorized {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
