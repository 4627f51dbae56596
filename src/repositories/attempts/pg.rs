use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use time::PrimitiveDateTime;

use super::{
    AnswerGrade, AttemptRepository, ManualGrade, NewAttempt, RepositoryResult, SectionGuard,
    StartInsert,
};
use crate::db::models::{AttemptAnswer, AttemptResult, AttemptSection, TestAttempt};
use crate::db::payloads::AnswerPayload;
use crate::db::types::AttemptStatus;

const COLUMNS: &str = "\
    id, test_id, student_id, attempt_number, status, started_at, submitted_at, \
    expires_at, section_expires_at, question_order, option_orders, current_section_index, \
    sections, result, auto_graded_at, grading_version, graded_at, graded_by, created_at, updated_at";

const ANSWER_COLUMNS: &str = "\
    attempt_id, question_id, answer, is_correct, marks_awarded, feedback, flagged, \
    graded_by, graded_at, answered_at, updated_at";

#[derive(Clone)]
pub(crate) struct PgAttemptRepository {
    pool: PgPool,
}

impl PgAttemptRepository {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn with_answers(&self, attempts: Vec<TestAttempt>) -> RepositoryResult<Vec<TestAttempt>> {
        if attempts.is_empty() {
            return Ok(attempts);
        }

        let ids: Vec<String> = attempts.iter().map(|attempt| attempt.id.clone()).collect();
        let rows = sqlx::query_as::<_, AttemptAnswer>(&format!(
            "SELECT {ANSWER_COLUMNS} FROM attempt_answers WHERE attempt_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut by_attempt: HashMap<String, Vec<AttemptAnswer>> = HashMap::new();
        for row in rows {
            by_attempt.entry(row.attempt_id.clone()).or_default().push(row);
        }

        Ok(attempts
            .into_iter()
            .map(|mut attempt| {
                attempt.answers = by_attempt.remove(&attempt.id).unwrap_or_default();
                attempt
            })
            .collect())
    }

    async fn one_with_answers(
        &self,
        attempt: Option<TestAttempt>,
    ) -> RepositoryResult<Option<TestAttempt>> {
        match attempt {
            Some(attempt) => Ok(self.with_answers(vec![attempt]).await?.pop()),
            None => Ok(None),
        }
    }
}

fn push_section_guard(builder: &mut QueryBuilder<'_, Postgres>, guard: SectionGuard) {
    match guard {
        SectionGuard::Any => {}
        SectionGuard::Exactly(index) => {
            builder.push(" AND current_section_index = ");
            builder.push_bind(index);
        }
        SectionGuard::AtMost(index) => {
            builder.push(" AND current_section_index <= ");
            builder.push_bind(index);
        }
    }
}

fn push_open_attempt_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    attempt_id: &str,
    guard: SectionGuard,
    now: PrimitiveDateTime,
) {
    builder.push(" FROM test_attempts WHERE id = ");
    builder.push_bind(attempt_id.to_string());
    builder.push(" AND status = ");
    builder.push_bind(AttemptStatus::InProgress);
    builder.push(" AND (expires_at IS NULL OR expires_at > ");
    builder.push_bind(now);
    builder.push(") AND (section_expires_at IS NULL OR section_expires_at > ");
    builder.push_bind(now);
    builder.push(")");
    push_section_guard(builder, guard);
    builder.push(" FOR SHARE");
}

#[async_trait]
impl AttemptRepository for PgAttemptRepository {
    async fn find_by_id(&self, attempt_id: &str) -> RepositoryResult<Option<TestAttempt>> {
        let attempt = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts WHERE id = $1"
        ))
        .bind(attempt_id)
        .fetch_optional(&self.pool)
        .await?;

        self.one_with_answers(attempt).await
    }

    async fn find_in_progress(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>> {
        let attempt = find_in_progress(&self.pool, test_id, student_id).await?;
        self.one_with_answers(attempt).await
    }

    async fn find_latest(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> RepositoryResult<Option<TestAttempt>> {
        let attempt = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts \
             WHERE test_id = $1 AND student_id = $2 \
             ORDER BY attempt_number DESC LIMIT 1"
        ))
        .bind(test_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        self.one_with_answers(attempt).await
    }

    async fn count_for_student(&self, test_id: &str, student_id: &str) -> RepositoryResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM test_attempts WHERE test_id = $1 AND student_id = $2",
        )
        .bind(test_id)
        .bind(student_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn insert_attempt(&self, attempt: NewAttempt) -> RepositoryResult<StartInsert> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("attempt-start:{}:{}", attempt.test_id, attempt.student_id))
            .execute(&mut *tx)
            .await?;

        if let Some(existing) =
            find_in_progress(&mut *tx, &attempt.test_id, &attempt.student_id).await?
        {
            tx.commit().await?;
            let existing = self.one_with_answers(Some(existing)).await?;
            return Ok(match existing {
                Some(existing) => StartInsert::InProgressExists(existing),
                None => StartInsert::NumberTaken,
            });
        }

        let inserted = sqlx::query_as::<_, TestAttempt>(&format!(
            "INSERT INTO test_attempts (
                id, test_id, student_id, attempt_number, status, started_at,
                expires_at, section_expires_at, question_order, option_orders,
                current_section_index, sections, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,0,$11,$6,$6)
            ON CONFLICT DO NOTHING
            RETURNING {COLUMNS}"
        ))
        .bind(&attempt.id)
        .bind(&attempt.test_id)
        .bind(&attempt.student_id)
        .bind(attempt.attempt_number)
        .bind(AttemptStatus::InProgress)
        .bind(attempt.started_at)
        .bind(attempt.expires_at)
        .bind(attempt.section_expires_at)
        .bind(Json(&attempt.question_order))
        .bind(Json(&attempt.option_orders))
        .bind(Json(&attempt.sections))
        .fetch_optional(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(match inserted {
            Some(row) => StartInsert::Inserted(row),
            None => StartInsert::NumberTaken,
        })
    }

    async fn list_by_test(
        &self,
        test_id: &str,
        statuses: &[AttemptStatus],
    ) -> RepositoryResult<Vec<TestAttempt>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {COLUMNS} FROM test_attempts WHERE test_id = "));
        builder.push_bind(test_id.to_string());

        if !statuses.is_empty() {
            builder.push(" AND status IN (");
            let mut separated = builder.separated(", ");
            for status in statuses {
                separated.push_bind(*status);
            }
            separated.push_unseparated(")");
        }

        builder.push(" ORDER BY submitted_at ASC NULLS LAST, attempt_number ASC");

        let attempts = builder.build_query_as::<TestAttempt>().fetch_all(&self.pool).await?;
        self.with_answers(attempts).await
    }

    async fn upsert_answer(
        &self,
        attempt_id: &str,
        question_id: &str,
        payload: &AnswerPayload,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO attempt_answers (attempt_id, question_id, answer, answered_at, updated_at) \
             SELECT id, ",
        );
        builder.push_bind(question_id.to_string());
        builder.push(", ");
        builder.push_bind(Json(payload.clone()));
        builder.push(", ");
        builder.push_bind(now);
        builder.push(", ");
        builder.push_bind(now);
        push_open_attempt_filter(&mut builder, attempt_id, guard, now);
        builder.push(
            " ON CONFLICT (attempt_id, question_id) DO UPDATE SET \
             answer = EXCLUDED.answer, answered_at = EXCLUDED.answered_at, \
             updated_at = EXCLUDED.updated_at, is_correct = NULL, marks_awarded = NULL",
        );

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_flag(
        &self,
        attempt_id: &str,
        question_id: &str,
        flagged: bool,
        guard: SectionGuard,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO attempt_answers (attempt_id, question_id, flagged, updated_at) SELECT id, ",
        );
        builder.push_bind(question_id.to_string());
        builder.push(", ");
        builder.push_bind(flagged);
        builder.push(", ");
        builder.push_bind(now);
        push_open_attempt_filter(&mut builder, attempt_id, guard, now);
        builder.push(
            " ON CONFLICT (attempt_id, question_id) DO UPDATE SET \
             flagged = EXCLUDED.flagged, updated_at = EXCLUDED.updated_at",
        );

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
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
        let result = sqlx::query(
            "UPDATE test_attempts
             SET current_section_index = $1, sections = $2, section_expires_at = $3, updated_at = $4
             WHERE id = $5 AND status = $6 AND current_section_index = $7",
        )
        .bind(new_index)
        .bind(Json(sections))
        .bind(section_expires_at)
        .bind(now)
        .bind(attempt_id)
        .bind(AttemptStatus::InProgress)
        .bind(expected_index)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn close_attempt(
        &self,
        attempt_id: &str,
        status: AttemptStatus,
        submitted_at: PrimitiveDateTime,
        sections: &[AttemptSection],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE test_attempts
             SET status = $1, submitted_at = $2, sections = $3, section_expires_at = NULL,
                 updated_at = $4
             WHERE id = $5 AND status = $6",
        )
        .bind(status)
        .bind(submitted_at)
        .bind(Json(sections))
        .bind(now)
        .bind(attempt_id)
        .bind(AttemptStatus::InProgress)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_auto_grades(
        &self,
        attempt_id: &str,
        grades: &[AnswerGrade],
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            "UPDATE test_attempts
             SET auto_graded_at = $1, grading_version = grading_version + 1, updated_at = $1
             WHERE id = $2 AND auto_graded_at IS NULL AND status IN ($3, $4)",
        )
        .bind(now)
        .bind(attempt_id)
        .bind(AttemptStatus::Submitted)
        .bind(AttemptStatus::AutoSubmitted)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for grade in grades {
            sqlx::query(
                "UPDATE attempt_answers
                 SET is_correct = $1, marks_awarded = $2, graded_at = $3, updated_at = $3
                 WHERE attempt_id = $4 AND question_id = $5 AND marks_awarded IS NULL",
            )
            .bind(grade.is_correct)
            .bind(grade.marks)
            .bind(now)
            .bind(attempt_id)
            .bind(&grade.question_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn grade_answer(&self, grade: ManualGrade<'_>) -> RepositoryResult<bool> {
        let mut tx = self.pool.begin().await?;

        let open: Option<String> = sqlx::query_scalar(
            "SELECT id FROM test_attempts WHERE id = $1 AND status IN ($2, $3) FOR UPDATE",
        )
        .bind(grade.attempt_id)
        .bind(AttemptStatus::Submitted)
        .bind(AttemptStatus::AutoSubmitted)
        .fetch_optional(&mut *tx)
        .await?;
        if open.is_none() {
            tx.rollback().await?;
            return Ok(false);
        }

        let graded = sqlx::query(
            "UPDATE attempt_answers
             SET marks_awarded = $1, is_correct = $2, feedback = $3, graded_by = $4,
                 graded_at = $5, updated_at = $5
             WHERE attempt_id = $6 AND question_id = $7 AND answer IS NOT NULL",
        )
        .bind(grade.marks)
        .bind(grade.is_correct)
        .bind(grade.feedback)
        .bind(grade.grader)
        .bind(grade.now)
        .bind(grade.attempt_id)
        .bind(grade.question_id)
        .execute(&mut *tx)
        .await?;
        if graded.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            "UPDATE test_attempts SET grading_version = grading_version + 1, updated_at = $1
             WHERE id = $2",
        )
        .bind(grade.now)
        .bind(grade.attempt_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
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
        let updated = sqlx::query(
            "UPDATE test_attempts
             SET status = $1, result = $2, graded_at = $3, graded_by = $4, updated_at = $3
             WHERE id = $5 AND status IN ($6, $7) AND grading_version = $8",
        )
        .bind(AttemptStatus::Graded)
        .bind(Json(result))
        .bind(now)
        .bind(grader)
        .bind(attempt_id)
        .bind(AttemptStatus::Submitted)
        .bind(AttemptStatus::AutoSubmitted)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn update_standings(
        &self,
        attempt_id: &str,
        rank: i32,
        percentile: f64,
        now: PrimitiveDateTime,
    ) -> RepositoryResult<bool> {
        let updated = sqlx::query(
            "UPDATE test_attempts
             SET result = jsonb_set(
                    jsonb_set(result, '{rank}', to_jsonb($1::int)),
                    '{percentile}', to_jsonb($2::float8)
                 ),
                 updated_at = $3
             WHERE id = $4 AND status = $5",
        )
        .bind(rank)
        .bind(percentile)
        .bind(now)
        .bind(attempt_id)
        .bind(AttemptStatus::Graded)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn list_expired(
        &self,
        now: PrimitiveDateTime,
        limit: i64,
    ) -> RepositoryResult<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts
             WHERE status = $1 AND (expires_at <= $2 OR section_expires_at <= $2)
             ORDER BY LEAST(expires_at, section_expires_at) ASC
             LIMIT $3"
        ))
        .bind(AttemptStatus::InProgress)
        .bind(now)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;

        Ok(attempts)
    }

    async fn list_unsettled(&self, limit: i64) -> RepositoryResult<Vec<TestAttempt>> {
        let attempts = sqlx::query_as::<_, TestAttempt>(&format!(
            "SELECT {COLUMNS} FROM test_attempts
             WHERE status IN ($1, $2) AND auto_graded_at IS NULL
             ORDER BY submitted_at ASC
             LIMIT $3"
        ))
        .bind(AttemptStatus::Submitted)
        .bind(AttemptStatus::AutoSubmitted)
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await?;

        self.with_answers(attempts).await
    }
}

async fn find_in_progress(
    executor: impl sqlx::PgExecutor<'_>,
    test_id: &str,
    student_id: &str,
) -> Result<Option<TestAttempt>, sqlx::Error> {
    sqlx::query_as::<_, TestAttempt>(&format!(
        "SELECT {COLUMNS} FROM test_attempts \
         WHERE test_id = $1 AND student_id = $2 AND status = $3"
    ))
    .bind(test_id)
    .bind(student_id)
    .bind(AttemptStatus::InProgress)
    .fetch_optional(executor)
    .await
}
