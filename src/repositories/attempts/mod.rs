//! Persistence boundary for attempts and their answers.
//!
//! Every mutating method is a single conditional write: it only applies when
//! the stored state still matches what the caller observed, and reports
//! whether it did through its boolean result.

mod pg;
#[cfg(test)]
pub(crate) mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use time::PrimitiveDateTime;

use crate::db::models::{AttemptResult, AttemptSection, TestAttempt};
use crate::db::payloads::AnswerPayload;
use crate::db::types::AttemptStatus;

pub(crate) use pg::PgAttemptRepository;

#[derive(Debug, Error)]
pub(crate) enum RepositoryError {
    /// Serialization failure, deadlock or a lost race that may succeed on retry.
    #[error("transient storage conflict: {0}")]
    Transient(String),
    #[error("storage failure: {0}")]
    Database(String),
}

impl RepositoryError {
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        let transient = match &err {
            sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
            _ => false,
        };

        if transient {
            Self::Transient(err.to_string())
        } else {
            Self::Database(err.to_string())
        }
    }
}

pub(crate) type RepositoryResult<T> = Result<T, RepositoryError>;

#[derive(Debug, Clone)]
pub(crate) struct NewAttempt {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) section_expires_at: Option<PrimitiveDateTime>,
    pub(crate) question_order: Vec<String>,
    pub(crate) option_orders: HashMap<String, Vec<String>>,
    pub(crate) sections: Vec<AttemptSection>,
}

#[derive(Debug)]
pub(crate) enum StartInsert {
    Inserted(TestAttempt),
    /// Another request already holds an in-progress attempt for the pair.
    InProgressExists(TestAttempt),
    /// The attempt number was claimed concurrently.
    NumberTaken,
}

/// Constraint on `current_section_index` for answer and flag writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SectionGuard {
    Any,
    Exactly(i32),
    AtMost(i32),
}

impl SectionGuard {
    pub(crate) fn admits(self, current_section_index: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(index) => current_section_index == index,
            Self::AtMost(index) => current_section_index <= index,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnswerGrade {
    pub(crate) question_id: String,
    pub(crate) is_correct: bool,
    pub(crate) marks: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct ManualGrade<'a> {
    pub(crate) attempt_id: &'a str,
    pub(crate) question_id: &'a str,
    pub(crate) marks: f64,
    pub(crate) is_correct: bool,
    pub(crate) feedback: Option<&'a str>,
    pub(crate) grader: &'a str,
    pub(crate) now: PrimitiveDateTime,
}

#[async_trait]
pub(crate) trait AttemptRepository: Send + Sync {
    async fn find_by_id(&self, attempt_id: &str) -> RepositoryResult<Option<TestAttempt>>;

    async fn find_in_progress(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>>;

    /// Highest-numbered attempt for the pair, whatever its status.
    async fn find_latest(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>>;

    async fn count_for_student(&self, test_id: &str, student_id: &str) -> RepositoryResult<i64>;

    async fn insert_attempt(&self, attempt: NewAttempt) -> RepositoryResult<StartInsert>;

    async fn list_by_test(
        &self,
        test_id: &str,
        statuses: &[AttemptStatus],
    ) -> RepositoryResult<Vec<TestAttempt>>;

    /// Upserts the answer while the attempt is in progress, before its
    /// deadlines, and `guard` admits the current section.
    async fn upsert_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        payload: &AnswerPayload,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    async fn set_flag(
        &self,
        attempt_id: &str,
        question_id: &str,
        flagged: bool,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    /// Moves `current_section_index` from `expected_index` to `new_index`.
    async fn advance_sections(
        &self,
        attempt_id: &str,
        expected_index: i32,
        new_index: i32,
        sections: &[AttemptSection],
        section_expires_at: Option<PrimitiveDateTime>,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    /// `in_progress -> status`; exactly one concurrent caller wins.
    async fn close_attempt(
        &self,
        attempt_id: &str,
        status: AttemptStatus,
        submitted_at: PrimitiveDateTime,
        sections: &[AttemptSection],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    /// Writes objective grades once per closed attempt and bumps its
    /// `grading_version`. Answers that already carry marks keep them.
    async fn record_auto_grades(
        &self,
        attempt_id: &str,
        grades: &[AnswerGrade],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    /// Writes manual marks while the attempt is closed and bumps its
    /// `grading_version`.
    async fn grade_answer(&self, grade: ManualGrade<'_>) -> RepositoryResult<bool>;

    /// `{submitted, auto_submitted} -> graded` together with the result,
    /// provided no marks changed since `expected_version` was read.
    async fn mark_graded(
        &self,
        attempt_id: &str,
        expected_version: i32,
        result: &AttemptResult,
        grader: Option<&str>,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    async fn update_standings(
        &self,
        attempt_id: &str,
        rank: i32,
        percentile: f64,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool>;

    /// In-progress attempts whose attempt or section deadline has passed.
    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<TestAttempt>>;

    /// Closed attempts that were never auto-graded.
    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<TestAttempt>>;
}
