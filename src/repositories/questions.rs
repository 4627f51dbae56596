use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;

use crate::db::models::{QuestionRow, QuestionSnapshot};
use crate::services::ports::QuestionBank;

#[derive(Clone)]
pub(crate) struct PgQuestionBank {
    pool: PgPool,
}

impl PgQuestionBank {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn snapshot_from_row(row: QuestionRow) -> anyhow::Result<QuestionSnapshot> {
    let key_type = row.answer_key.0.question_type();
    if key_type != row.question_type {
        anyhow::bail!(
            "question {} is {} but its answer key is {}",
            row.id,
            row.question_type.as_str(),
            key_type.as_str()
        );
    }

    Ok(QuestionSnapshot {
        id: row.id,
        question_type: row.question_type,
        subject: row.subject,
        prompt: row.prompt,
        options: row.options.0,
        answer_key: row.answer_key.0,
        max_marks: row.max_marks,
        explanation: row.explanation,
        solution: row.solution,
    })
}

#[async_trait]
impl QuestionBank for PgQuestionBank {
    async fn questions_by_ids(&self, ids: &[String]) -> anyhow::Result<Vec<QuestionSnapshot>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, QuestionRow>(
            "SELECT id, question_type, subject, prompt, options, answer_key, max_marks,
                    explanation, solution
             FROM questions WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load question snapshots")?;

        rows.into_iter().map(snapshot_from_row).collect()
    }
}
