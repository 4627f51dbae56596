use std::collections::HashMap;

use super::{retry_once, EngineError, ExamEngine};
use crate::db::models::TestDefinition;
use crate::db::types::AttemptStatus;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub(crate) closed: usize,
    pub(crate) advanced: usize,
    pub(crate) failed: usize,
}

impl ExamEngine {
    /// Applies passed deadlines to up to `limit` in-progress attempts.
    pub(crate) async fn sweep_expired(&self, limit: i64) -> Result<SweepReport, EngineError> {
        let now = self.now();
        let repo = self.attempts();
        let expired = retry_once("list_expired", move || repo.list_expired(now, limit)).await?;

        let mut report = SweepReport::default();
        let mut tests: HashMap<String, Option<TestDefinition>> = HashMap::new();

        for attempt in expired {
            let Some(test) = self.cached_test(&mut tests, &attempt.test_id).await else {
                report.failed += 1;
                continue;
            };

            let attempt_id = attempt.id.clone();
            let section_before = attempt.current_section_index;
            match self.enforce_deadlines(&test, attempt).await {
                Ok(after) if after.status != AttemptStatus::InProgress => report.closed += 1,
                Ok(after) if after.current_section_index > section_before => report.advanced += 1,
                Ok(_) => {}
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(attempt_id = %attempt_id, error = %err, "Failed to enforce attempt deadline");
                }
            }
        }

        Ok(report)
    }

    /// Re-runs auto-grading for closed attempts that never got it.
    pub(crate) async fn settle_unsettled(&self, limit: i64) -> Result<usize, EngineError> {
        let repo = self.attempts();
        let unsettled = retry_once("list_unsettled", move || repo.list_unsettled(limit)).await?;

        let mut tests: HashMap<String, Option<TestDefinition>> = HashMap::new();
        let mut settled = 0;

        for attempt in unsettled {
            let Some(test) = self.cached_test(&mut tests, &attempt.test_id).await else {
                continue;
            };
            match self.settle_closed(&test, &attempt.id).await {
                Ok(()) => settled += 1,
                Err(err) => {
                    tracing::error!(attempt_id = %attempt.id, error = %err, "Failed to settle closed attempt");
                }
            }
        }

        Ok(settled)
    }

    async fn cached_test(
        &self,
        cache: &mut HashMap<String, Option<TestDefinition>>,
        test_id: &str,
    ) -> Option<TestDefinition> {
        if let Some(cached) = cache.get(test_id) {
            return cached.clone();
        }

        let loaded = match self.load_test(test_id).await {
            Ok(test) => Some(test),
            Err(err) => {
                tracing::warn!(test_id, error = %err, "Skipping attempts of unavailable test");
                None
            }
        };
        cache.insert(test_id.to_string(), loaded.clone());
        loaded
    }
}
