//! Narrow contracts for collaborators owned by other services.

use async_trait::async_trait;
use time::PrimitiveDateTime;

use crate::db::models::{QuestionSnapshot, StudentProfile, TestDefinition};
use crate::db::types::NotificationKind;

#[async_trait]
pub(crate) trait QuestionBank: Send + Sync {
    /// Returns the snapshots that exist; missing ids are simply absent.
    async fn questions_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<QuestionSnapshot>>;
}

#[async_trait]
pub(crate) trait TestDefinitionStore: Send + Sync {
    async fn test_definition(&self, test_id: &str) -> anyhow::Result<Option<TestDefinition>>;
}

#[async_trait]
pub(crate) trait MembershipDirectory: Send + Sync {
    async fn is_manager_of(&self, company_id: &str, email: &str) -> anyhow::Result<bool>;

    async fn student_profiles(&self, student_ids: &[String]) -> anyhow::Result<Vec<StudentProfile>>;
}

#[async_trait]
pub(crate) trait Notifier: Send + Sync {
    async fn notify(
        &self,
        student_id: &str,
        kind: NotificationKind,
        payload: serde_json::Value,
    ) -> anyhow::Result<()>;
}

pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> PrimitiveDateTime;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PrimitiveDateTime {
        crate::core::time::primitive_now_utc()
    }
}
