use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::StudentProfile;
use crate::services::ports::MembershipDirectory;

#[derive(Clone)]
pub(crate) struct PgMembershipDirectory {
    pool: PgPool,
}

impl PgMembershipDirectory {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MembershipDirectory for PgMembershipDirectory {
    async fn is_manager_of(&self, company_id: &str, email: &str) -> anyhow::Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(
                SELECT 1 FROM company_managers WHERE company_id = $1 AND lower(email) = lower($2)
             )",
        )
        .bind(company_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check company manager")
    }

    async fn student_profiles(&self, student_ids: &[String]) -> anyhow::Result<Vec<StudentProfile>> {
        if student_ids.is_empty() {
            return Ok(Vec::new());
        }

        sqlx::query_as::<_, StudentProfile>(
            "SELECT id, full_name, email FROM students WHERE id = ANY($1)",
        )
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load student profiles")
    }
}
