use std::fmt::Display;

use thiserror::Error;

use crate::db::types::AttemptStatus;

#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error("{0}")]
    InvalidState(String),
    #[error("attempt limit of {max_attempts} reached for test {test_id}")]
    AttemptLimitExceeded { test_id: String, max_attempts: i32 },
    #[error(
        "question {question_id} is in section {question_section} but section {current_section} is active"
    )]
    SectionMismatch { question_id: String, question_section: i32, current_section: i32 },
    #[error("cannot move from section {current} to section {target}; sections must be taken in order")]
    CannotSkipSections { current: i32, target: i32 },
    #[error("cannot return from section {current} to section {target}")]
    ReviewNotAllowed { current: i32, target: i32 },
    #[error("attempt {attempt_id} is already {status}")]
    AttemptClosed { attempt_id: String, status: AttemptStatus },
    #[error("marks {marks} for question {question_id} must be between 0 and {max_marks}")]
    MarksOutOfRange { question_id: String, marks: f64, max_marks: f64 },
    #[error("attempt {attempt_id} still has an ungraded answer for question {question_id}")]
    IncompleteGrading { attempt_id: String, question_id: String },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid answer for question {question_id}: {reason}")]
    InvalidAnswer { question_id: String, reason: String },
    #[error("{email} does not manage test {test_id}")]
    NotManager { test_id: String, email: String },
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    pub(crate) fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Logs the underlying failure and returns a redacted `Internal`.
    pub(crate) fn internal(context: &str, err: impl Display) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    pub(crate) fn code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "invalid_state",
            Self::AttemptLimitExceeded { .. } => "attempt_limit_exceeded",
            Self::SectionMismatch { .. } => "section_mismatch",
            Self::CannotSkipSections { .. } => "cannot_skip_sections",
            Self::ReviewNotAllowed { .. } => "review_not_allowed",
            Self::AttemptClosed { .. } => "attempt_closed",
            Self::MarksOutOfRange { .. } => "marks_out_of_range",
            Self::IncompleteGrading { .. } => "incomplete_grading",
            Self::NotFound { .. } => "not_found",
            Self::InvalidAnswer { .. } => "invalid_answer",
            Self::NotManager { .. } => "not_manager",
            Self::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_context() {
        let err = EngineError::MarksOutOfRange {
            question_id: "q-7".to_string(),
            marks: 11.0,
            max_marks: 10.0,
        };
        assert_eq!(err.code(), "marks_out_of_range");
        assert_eq!(err.to_string(), "marks 11 for question q-7 must be between 0 and 10");

        let err = EngineError::AttemptClosed {
            attempt_id: "a-1".to_string(),
            status: AttemptStatus::AutoSubmitted,
        };
        assert_eq!(err.to_string(), "attempt a-1 is already auto_submitted");
    }
}
