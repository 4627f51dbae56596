//! Attempt lifecycle and grading on top of the repository and the
//! collaborator ports.

mod error;
mod grading;
mod maintenance;
mod session;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use time::PrimitiveDateTime;

use crate::db::models::{QuestionSnapshot, TestAttempt, TestDefinition};
use crate::repositories::attempts::{AttemptRepository, RepositoryResult};
use crate::services::ports::{Clock, MembershipDirectory, Notifier, QuestionBank, TestDefinitionStore};
use crate::services::results::GradingConfig;

pub(crate) use error::EngineError;
pub(crate) use grading::{
    BulkGradeFailure, BulkGradeItem, BulkGradeReport, FinalizeReport, GradedAnswer,
    UngradedAnswer, UngradedQuestion,
};
pub(crate) use maintenance::SweepReport;
pub(crate) use session::{
    AnswerOutcome, FlagOutcome, InstantFeedback, ResultView, SessionView, StartOutcome,
    SubmitOutcome,
};

pub(crate) struct EnginePorts {
    pub(crate) attempts: Arc<dyn AttemptRepository>,
    pub(crate) tests: Arc<dyn TestDefinitionStore>,
    pub(crate) questions: Arc<dyn QuestionBank>,
    pub(crate) directory: Arc<dyn MembershipDirectory>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
}

#[derive(Clone)]
pub(crate) struct ExamEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    ports: EnginePorts,
    grading: GradingConfig,
}

impl ExamEngine {
    pub(crate) fn new(ports: EnginePorts, grading: GradingConfig) -> Self {
        Self { inner: Arc::new(EngineInner { ports, grading }) }
    }

    pub(crate) fn grading_config(&self) -> &GradingConfig {
        &self.inner.grading
    }

    fn attempts(&self) -> &dyn AttemptRepository {
        self.inner.ports.attempts.as_ref()
    }

    fn directory(&self) -> &dyn MembershipDirectory {
        self.inner.ports.directory.as_ref()
    }

    fn notifier(&self) -> &dyn Notifier {
        self.inner.ports.notifier.as_ref()
    }

    fn now(&self) -> PrimitiveDateTime {
        self.inner.ports.clock.now()
    }

    async fn load_test(&self, test_id: &str) -> Result<TestDefinition, EngineError> {
        self.inner
            .ports
            .tests
            .test_definition(test_id)
            .await
            .map_err(|err| EngineError::internal("Failed to load test definition", err))?
            .ok_or_else(|| EngineError::not_found("test", test_id))
    }

    /// Snapshots for `ids`; ids the bank no longer knows are skipped.
    async fn load_questions(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, QuestionSnapshot>, EngineError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let questions = self
            .inner
            .ports
            .questions
            .questions_by_ids(ids)
            .await
            .map_err(|err| EngineError::internal("Failed to load questions", err))?;

        Ok(questions.into_iter().map(|question| (question.id.clone(), question)).collect())
    }

    async fn require_questions(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, QuestionSnapshot>, EngineError> {
        let questions = self.load_questions(ids).await?;
        if let Some(missing) = ids.iter().find(|id| !questions.contains_key(id.as_str())) {
            return Err(EngineError::not_found("question", missing.clone()));
        }
        Ok(questions)
    }

    async fn reload(&self, attempt_id: &str) -> Result<TestAttempt, EngineError> {
        let repo = self.attempts();
        retry_once("find_by_id", move || repo.find_by_id(attempt_id))
            .await?
            .ok_or_else(|| EngineError::not_found("attempt", attempt_id))
    }

    async fn ensure_manager(&self, test: &TestDefinition, email: &str) -> Result<(), EngineError> {
        let allowed = self
            .directory()
            .is_manager_of(&test.company_id, email)
            .await
            .map_err(|err| EngineError::internal("Failed to check test membership", err))?;

        if allowed {
            Ok(())
        } else {
            Err(EngineError::NotManager { test_id: test.id.clone(), email: email.to_string() })
        }
    }
}

/// Runs a repository call, retrying once when the failure is transient.
async fn retry_once<T, F, Fut>(operation: &'static str, mut call: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RepositoryResult<T>>,
{
    match call().await {
        Ok(value) => Ok(value),
        Err(err) if err.is_transient() => {
            tracing::warn!(operation, error = %err, "Transient repository failure; retrying");
            call().await.map_err(|err| EngineError::internal(operation, err))
        }
        Err(err) => Err(EngineError::internal(operation, err)),
    }
}
