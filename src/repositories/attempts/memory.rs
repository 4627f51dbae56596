use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use sqlx::types::Json;
use time::PrimitiveDateTime;
use tokio::sync::Mutex;

use super::{
    AnswerGrade, AttemptRepository, ManualGrade, NewAttempt, RepositoryError, RepositoryResult,
    SectionGuard, StartInsert,
};
use crate::db::models::{AttemptAnswer, AttemptResult, AttemptSection, TestAttempt};
use crate::db::payloads::AnswerPayload;
use crate::db::types::AttemptStatus;

/// Attempt store backed by a single mutex; each call is one critical section.
#[derive(Default)]
pub(crate) struct MemoryAttemptRepository {
    attempts: Mutex<HashMap<String, TestAttempt>>,
    transient_failures: AtomicUsize,
}

impl MemoryAttemptRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls fail with a transient error.
    pub(crate) fn fail_transiently(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub(crate) async fn all(&self) -> Vec<TestAttempt> {
        self.attempts.lock().await.values().cloned().collect()
    }

    fn check_injected_failure(&self) -> RepositoryResult<()> {
        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RepositoryError::Transient("injected conflict".to_string()));
        }
        Ok(())
    }
}

fn open_for_writes(attempt: &TestAttempt, guard: SectionGuard, now: PrimitiveDateTime) -> bool {
    attempt.status == AttemptStatus::InProgress
        && attempt.expires_at.map_or(true, |deadline| deadline > now)
        && attempt.section_expires_at.map_or(true, |deadline| deadline > now)
        && guard.admits(attempt.current_section_index)
}

fn answer_entry<'a>(
    attempt: &'a mut TestAttempt,
    question_id: &str,
    now: PrimitiveDateTime,
) -> &'a mut AttemptAnswer {
    let position = attempt.answers.iter().position(|answer| answer.question_id == question_id);
    let index = match position {
        Some(index) => index,
        None => {
            attempt.answers.push(AttemptAnswer {
                attempt_id: attempt.id.clone(),
                question_id: question_id.to_string(),
                answer: None,
                is_correct: None,
                marks_awarded: None,
                feedback: None,
                flagged: false,
                graded_by: None,
                graded_at: None,
                answered_at: None,
                updated_at: now,
            });
            attempt.answers.len() - 1
        }
    };
    &mut attempt.answers[index]
}

#[async_trait]
impl AttemptRepository for MemoryAttemptRepository {
    async fn find_by_id(&self, attempt_id: &str) -> RepositoryResult<Option<TestAttempt>> {
        self.check_injected_failure()?;
        Ok(self.attempts.lock().await.get(attempt_id).cloned())
    }

    async fn find_in_progress(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .values()
            .find(|attempt| {
                attempt.test_id == test_id
                    && attempt.student_id == student_id
                    && attempt.status == AttemptStatus::InProgress
            })
            .cloned())
    }

    async fn find_latest(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .values()
            .filter(|attempt| attempt.test_id == test_id && attempt.student_id == student_id)
            .max_by_key(|attempt| attempt.attempt_number)
            .cloned())
    }

    async fn count_for_student(&self, test_id: &str, student_id: &str) -> RepositoryResult<i64> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .values()
            .filter(|attempt| attempt.test_id == test_id && attempt.student_id == student_id)
            .count() as i64)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> RepositoryResult<StartInsert> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;

        let same_pair = |existing: &&TestAttempt| {
            existing.test_id == attempt.test_id && existing.student_id == attempt.student_id
        };

        if let Some(existing) = attempts
            .values()
            .filter(same_pair)
            .find(|existing| existing.status == AttemptStatus::InProgress)
        {
            return Ok(StartInsert::InProgressExists(existing.clone()));
        }

        if attempts
            .values()
            .filter(same_pair)
            .any(|existing| existing.attempt_number == attempt.attempt_number)
        {
            return Ok(StartInsert::NumberTaken);
        }

        let row = TestAttempt {
            id: attempt.id.clone(),
            test_id: attempt.test_id,
            student_id: attempt.student_id,
            attempt_number: attempt.attempt_number,
            status: AttemptStatus::InProgress,
            started_at: attempt.started_at,
            submitted_at: None,
            expires_at: attempt.expires_at,
            section_expires_at: attempt.section_expires_at,
            question_order: Json(attempt.question_order),
            option_orders: Json(attempt.option_orders),
            current_section_index: 0,
            sections: Json(attempt.sections),
            result: None,
            auto_graded_at: None,
            grading_version: 0,
            graded_at: None,
            graded_by: None,
            created_at: attempt.started_at,
            updated_at: attempt.started_at,
            answers: Vec::new(),
        };
        attempts.insert(attempt.id, row.clone());
        Ok(StartInsert::Inserted(row))
    }

    async fn list_by_test(
        &self,
        test_id: &str,
        statuses: &[AttemptStatus],
    ) -> RepositoryResult<Vec<TestAttempt>> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        let mut matching: Vec<TestAttempt> = attempts
            .values()
            .filter(|attempt| attempt.test_id == test_id)
            .filter(|attempt| statuses.is_empty() || statuses.contains(&attempt.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.student_id.cmp(&b.student_id))
                .then_with(|| a.attempt_number.cmp(&b.attempt_number))
        });
        Ok(matching)
    }

    async fn upsert_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        payload: &AnswerPayload,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if !open_for_writes(attempt, guard, now) {
            return Ok(false);
        }

        let answer = answer_entry(attempt, question_id, now);
        answer.answer = Some(Json(payload.clone()));
        answer.answered_at = Some(now);
        answer.updated_at = now;
        answer.is_correct = None;
        answer.marks_awarded = None;
        Ok(true)
    }

    async fn set_flag(
        &self,
        attempt_id: &str,
        question_id: &str,
        flagged: bool,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if !open_for_writes(attempt, guard, now) {
            return Ok(false);
        }

        let answer = answer_entry(attempt, question_id, now);
        answer.flagged = flagged;
        answer.updated_at = now;
        Ok(true)
    }

    async fn advance_sections(
        &self,
        attempt_id: &str,
        expected_index: i32,
        new_index: i32,
        sections: &[AttemptSection],
        section_expires_at: Option<PrimitiveDateTime>,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::InProgress
            || attempt.current_section_index != expected_index
        {
            return Ok(false);
        }

        attempt.current_section_index = new_index;
        attempt.sections = Json(sections.to_vec());
        attempt.section_expires_at = section_expires_at;
        attempt.updated_at = now;
        Ok(true)
    }

    async fn close_attempt(
        &self,
        attempt_id: &str,
        status: AttemptStatus,
        submitted_at: PrimitiveDateTime,
        sections: &[AttemptSection],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::InProgress {
            return Ok(false);
        }

        attempt.status = status;
        attempt.submitted_at = Some(submitted_at);
        attempt.sections = Json(sections.to_vec());
        attempt.section_expires_at = None;
        attempt.updated_at = now;
        Ok(true)
    }

    async fn record_auto_grades(
        &self,
        attempt_id: &str,
        grades: &[AnswerGrade],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if !attempt.status.is_closed() || attempt.auto_graded_at.is_some() {
            return Ok(false);
        }

        for grade in grades {
            if let Some(answer) = attempt
                .answers
                .iter_mut()
                .find(|answer| answer.question_id == grade.question_id)
            {
                if answer.marks_awarded.is_none() {
                    answer.is_correct = Some(grade.is_correct);
                    answer.marks_awarded = Some(grade.marks);
                    answer.graded_at = Some(now);
                    answer.updated_at = now;
                }
            }
        }
        attempt.auto_graded_at = Some(now);
        attempt.grading_version += 1;
        attempt.updated_at = now;
        Ok(true)
    }

    async fn grade_answer(&self, grade: ManualGrade<'_>) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(grade.attempt_id) else {
            return Ok(false);
        };
        if !attempt.status.is_closed() {
            return Ok(false);
        }

        let Some(answer) = attempt
            .answers
            .iter_mut()
            .find(|answer| answer.question_id == grade.question_id && answer.answer.is_some())
        else {
            return Ok(false);
        };

        answer.marks_awarded = Some(grade.marks);
        answer.is_correct = Some(grade.is_correct);
        answer.feedback = grade.feedback.map(str::to_string);
        answer.graded_by = Some(grade.grader.to_string());
        answer.graded_at = Some(grade.now);
        answer.updated_at = grade.now;
        attempt.grading_version += 1;
        attempt.updated_at = grade.now;
        Ok(true)
    }

    async fn mark_graded(
        &self,
        attempt_id: &str,
        expected_version: i32,
        result: &AttemptResult,
        grader: Option<&str>,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if !attempt.status.is_closed() || attempt.grading_version != expected_version {
            return Ok(false);
        }

        attempt.status = AttemptStatus::Graded;
        attempt.result = Some(Json(result.clone()));
        attempt.graded_at = Some(now);
        attempt.graded_by = grader.map(str::to_string);
        attempt.updated_at = now;
        Ok(true)
    }

    async fn update_standings(
        &self,
        attempt_id: &str,
        rank: i32,
        percentile: f64,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        self.check_injected_failure()?;
        let mut attempts = self.attempts.lock().await;
        let Some(attempt) = attempts.get_mut(attempt_id) else {
            return Ok(false);
        };
        if attempt.status != AttemptStatus::Graded {
            return Ok(false);
        }
        let Some(result) = attempt.result.as_mut() else {
            return Ok(false);
        };

        result.0.rank = Some(rank);
        result.0.percentile = Some(percentile);
        attempt.updated_at = now;
        Ok(true)
    }

    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<TestAttempt>> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .values()
            .filter(|attempt| attempt.status == AttemptStatus::InProgress)
            .filter(|attempt| {
                attempt.expires_at.is_some_and(|deadline| deadline <= now)
                    || attempt.section_expires_at.is_some_and(|deadline| deadline <= now)
            })
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }

    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<TestAttempt>> {
        self.check_injected_failure()?;
        let attempts = self.attempts.lock().await;
        Ok(attempts
            .values()
            .filter(|attempt| attempt.status.is_closed() && attempt.auto_graded_at.is_none())
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }
}
