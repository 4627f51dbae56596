use std::collections::{BTreeSet, HashMap};

use serde_json::json;

use super::{retry_once, EngineError, ExamEngine};
use crate::db::models::{QuestionSnapshot, StudentProfile, TestAttempt, TestDefinition};
use crate::db::payloads::AnswerPayload;
use crate::db::types::{AttemptStatus, NotificationKind};
use crate::repositories::attempts::{AnswerGrade, ManualGrade};
use crate::services::results::{compute_result, compute_standings, Standing};
use crate::services::results_export::render_results_csv;
use crate::services::scoring::{derive_is_correct, score_objective};

const PROMOTE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub(crate) struct UngradedAnswer {
    pub(crate) attempt_id: String,
    pub(crate) student_id: String,
    pub(crate) answer: AnswerPayload,
    pub(crate) flagged: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct UngradedQuestion {
    pub(crate) question: QuestionSnapshot,
    pub(crate) answers: Vec<UngradedAnswer>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradedAnswer {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) marks: f64,
    pub(crate) is_correct: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct BulkGradeItem {
    pub(crate) attempt_id: String,
    pub(crate) marks: f64,
    pub(crate) feedback: Option<String>,
}

#[derive(Debug)]
pub(crate) struct BulkGradeFailure {
    pub(crate) attempt_id: String,
    pub(crate) error: EngineError,
}

#[derive(Debug, Default)]
pub(crate) struct BulkGradeReport {
    pub(crate) graded: Vec<GradedAnswer>,
    pub(crate) failures: Vec<BulkGradeFailure>,
}

#[derive(Debug, Clone)]
pub(crate) struct FinalizeReport {
    pub(crate) graded_attempts: usize,
    pub(crate) standings: Vec<Standing>,
}

impl ExamEngine {
    /// Scores the objective answers of a closed attempt and, when the
    /// attempt has no subjective questions, promotes it to graded.
    /// Safe to call repeatedly.
    pub(crate) async fn settle_closed(
        &self,
        test: &TestDefinition,
        attempt_id: &str,
    ) -> Result<(), EngineError> {
        let attempt = self.reload(attempt_id).await?;
        if !attempt.status.is_closed() {
            return Ok(());
        }

        let questions = self.load_questions(&attempt.question_order.0).await?;
        if attempt.auto_graded_at.is_none() {
            self.record_auto_grades(&attempt, &questions).await?;
        }

        let has_subjective = attempt.question_order.0.iter().any(|id| {
            questions.get(id).is_some_and(|question| !question.question_type.is_objective())
        });
        if has_subjective {
            tracing::debug!(attempt_id, "Attempt awaits manual grading");
            return Ok(());
        }

        let attempt = self.reload(attempt_id).await?;
        self.promote(test, &attempt, &questions, None).await?;
        Ok(())
    }

    async fn record_auto_grades(
        &self,
        attempt: &TestAttempt,
        questions: &HashMap<String, QuestionSnapshot>,
    ) -> Result<(), EngineError> {
        let grades: Vec<AnswerGrade> = attempt
            .answers
            .iter()
            .filter_map(|answer| {
                let payload = answer.answer.as_ref()?;
                let question = questions.get(&answer.question_id)?;
                let score = score_objective(question, &payload.0)?;
                Some(AnswerGrade {
                    question_id: answer.question_id.clone(),
                    is_correct: score.is_correct,
                    marks: score.marks,
                })
            })
            .collect();

        let now = self.now();
        let repo = self.attempts();
        let attempt_id = attempt.id.as_str();
        let batch = grades.as_slice();
        let recorded =
            retry_once("record_auto_grades", move || repo.record_auto_grades(attempt_id, batch, now))
                .await?;

        if recorded {
            metrics::counter!("answers_graded_total").increment(grades.len() as u64);
            tracing::info!(attempt_id, graded = grades.len(), "Objective answers auto-graded");
        }
        Ok(())
    }

    /// Computes the result and moves the attempt to graded. The result is
    /// recomputed from a fresh read whenever marks change underneath it.
    pub(super) async fn promote(
        &self,
        test: &TestDefinition,
        attempt: &TestAttempt,
        questions: &HashMap<String, QuestionSnapshot>,
        grader: Option<&str>,
    ) -> Result<bool, EngineError> {
        let attempt_id = attempt.id.as_str();
        let mut current = attempt.clone();
        let mut tries = 0;
        let result = loop {
            let result = compute_result(test, &current, questions, self.grading_config());

            let now = self.now();
            let repo = self.attempts();
            let version = current.grading_version;
            let stored = &result;
            let promoted = retry_once("mark_graded", move || {
                repo.mark_graded(attempt_id, version, stored, grader, now)
            })
            .await?;
            if promoted {
                break result;
            }

            current = self.reload(attempt_id).await?;
            if !current.status.is_closed() || current.grading_version == version {
                return Ok(false);
            }
            tries += 1;
            if tries >= PROMOTE_ATTEMPTS {
                return Err(EngineError::Internal(format!(
                    "marks for attempt {attempt_id} kept changing during promotion"
                )));
            }
            tracing::debug!(attempt_id, version, "Marks changed during promotion; recomputing");
        };

        metrics::counter!("attempts_graded_total").increment(1);
        tracing::info!(
            test_id = %test.id,
            attempt_id,
            percentage = result.percentage,
            grade = %result.grade,
            "Attempt graded"
        );

        let payload = json!({
            "testId": test.id,
            "attemptId": attempt.id,
            "percentage": result.percentage,
            "grade": result.grade,
        });
        if let Err(err) = self
            .notifier()
            .notify(&attempt.student_id, NotificationKind::ResultsPublished, payload)
            .await
        {
            tracing::warn!(attempt_id, error = %err, "Failed to publish results notification");
        }

        Ok(true)
    }

    /// Closed attempts' subjective answers that still lack marks, grouped by
    /// question in test order.
    pub(crate) async fn ungraded_answers(
        &self,
        test_id: &str,
        grader_email: &str,
    ) -> Result<Vec<UngradedQuestion>, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;

        let attempts = self.closed_attempts(test_id).await?;
        let question_ids = answered_question_ids(&attempts);
        let questions = self.load_questions(&question_ids).await?;

        let mut queue: Vec<UngradedQuestion> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for question_id in ordered_ids(&test, &question_ids) {
            let Some(question) = questions.get(&question_id) else {
                continue;
            };
            if question.question_type.is_objective() {
                continue;
            }
            positions.insert(question_id, queue.len());
            queue.push(UngradedQuestion { question: question.clone(), answers: Vec::new() });
        }

        for attempt in &attempts {
            for answer in &attempt.answers {
                let (Some(payload), None) = (&answer.answer, answer.marks_awarded) else {
                    continue;
                };
                let Some(&position) = positions.get(&answer.question_id) else {
                    continue;
                };
                queue[position].answers.push(UngradedAnswer {
                    attempt_id: attempt.id.clone(),
                    student_id: attempt.student_id.clone(),
                    answer: payload.0.clone(),
                    flagged: answer.flagged,
                });
            }
        }

        queue.retain(|entry| !entry.answers.is_empty());
        Ok(queue)
    }

    pub(crate) async fn grade_answer(
        &self,
        test_id: &str,
        attempt_id: &str,
        question_id: &str,
        marks: f64,
        feedback: Option<&str>,
        grader_email: &str,
    ) -> Result<GradedAnswer, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;

        let questions = self.require_questions(&[question_id.to_string()]).await?;
        let question = questions
            .get(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;

        self.grade_one(&test, question, attempt_id, marks, feedback, grader_email).await
    }

    /// Grades one question across many attempts; individual failures are
    /// reported without stopping the batch.
    pub(crate) async fn bulk_grade_question(
        &self,
        test_id: &str,
        question_id: &str,
        items: &[BulkGradeItem],
        grader_email: &str,
    ) -> Result<BulkGradeReport, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;
        if items.is_empty() {
            return Err(EngineError::InvalidState("no grades supplied".to_string()));
        }

        let questions = self.require_questions(&[question_id.to_string()]).await?;
        let question = questions
            .get(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;

        let mut report = BulkGradeReport::default();
        for item in items {
            match self
                .grade_one(
                    &test,
                    question,
                    &item.attempt_id,
                    item.marks,
                    item.feedback.as_deref(),
                    grader_email,
                )
                .await
            {
                Ok(graded) => report.graded.push(graded),
                Err(error) => {
                    tracing::warn!(attempt_id = %item.attempt_id, question_id, error = %error, "Bulk grade item rejected");
                    report.failures.push(BulkGradeFailure { attempt_id: item.attempt_id.clone(), error });
                }
            }
        }

        if report.graded.is_empty() && !report.failures.is_empty() {
            return Err(report.failures.remove(0).error);
        }

        tracing::info!(
            test_id,
            question_id,
            graded = report.graded.len(),
            failed = report.failures.len(),
            "Bulk grading applied"
        );
        Ok(report)
    }

    async fn grade_one(
        &self,
        test: &TestDefinition,
        question: &QuestionSnapshot,
        attempt_id: &str,
        marks: f64,
        feedback: Option<&str>,
        grader: &str,
    ) -> Result<GradedAnswer, EngineError> {
        let question_id = question.id.as_str();
        let attempt = self.reload(attempt_id).await?;
        if attempt.test_id != test.id {
            return Err(EngineError::not_found("attempt", attempt_id));
        }
        ensure_awaiting_grading(&attempt)?;

        if !attempt.question_order.0.iter().any(|id| id == question_id) {
            return Err(EngineError::not_found("question", question_id));
        }
        if !(0.0..=question.max_marks).contains(&marks) {
            return Err(EngineError::MarksOutOfRange {
                question_id: question_id.to_string(),
                marks,
                max_marks: question.max_marks,
            });
        }
        if attempt.answer(question_id).and_then(|answer| answer.answer.as_ref()).is_none() {
            return Err(EngineError::not_found("answer", format!("{attempt_id}/{question_id}")));
        }

        let is_correct =
            derive_is_correct(marks, question.max_marks, self.grading_config().correct_threshold);
        let repo = self.attempts();
        let now = self.now();
        let applied = retry_once("grade_answer", move || {
            repo.grade_answer(ManualGrade {
                attempt_id,
                question_id,
                marks,
                is_correct,
                feedback,
                grader,
                now,
            })
        })
        .await?;

        if !applied {
            let attempt = self.reload(attempt_id).await?;
            ensure_awaiting_grading(&attempt)?;
            return Err(EngineError::not_found("answer", format!("{attempt_id}/{question_id}")));
        }

        metrics::counter!("answers_graded_total").increment(1);
        tracing::info!(test_id = %test.id, attempt_id, question_id, marks, grader, "Answer graded");
        Ok(GradedAnswer {
            attempt_id: attempt_id.to_string(),
            question_id: question_id.to_string(),
            marks,
            is_correct,
        })
    }

    /// Promotes every closed attempt of the test to graded, then refreshes
    /// standings. Refuses while any subjective answer is unmarked.
    pub(crate) async fn finalize_grading(
        &self,
        test_id: &str,
        grader_email: &str,
    ) -> Result<FinalizeReport, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;

        let pending = self.closed_attempts(test_id).await?;
        let all_ids = question_order_ids(&pending);
        let questions = self.load_questions(&all_ids).await?;

        for attempt in pending.iter().filter(|attempt| attempt.auto_graded_at.is_none()) {
            self.record_auto_grades(attempt, &questions).await?;
        }

        let attempts = self.closed_attempts(test_id).await?;
        for attempt in &attempts {
            if let Some(answer) = attempt.answers.iter().find(|answer| {
                answer.answer.is_some()
                    && answer.marks_awarded.is_none()
                    && questions
                        .get(&answer.question_id)
                        .is_some_and(|question| !question.question_type.is_objective())
            }) {
                return Err(EngineError::IncompleteGrading {
                    attempt_id: attempt.id.clone(),
                    question_id: answer.question_id.clone(),
                });
            }
        }

        let mut graded_attempts = 0;
        for attempt in &attempts {
            if self.promote(&test, attempt, &questions, Some(grader_email)).await? {
                graded_attempts += 1;
            }
        }

        let standings = self.refresh_standings(&test).await?;
        tracing::info!(test_id, graded_attempts, ranked = standings.len(), grader = grader_email, "Grading finalized");
        Ok(FinalizeReport { graded_attempts, standings })
    }

    pub(crate) async fn recompute_standings(
        &self,
        test_id: &str,
        grader_email: &str,
    ) -> Result<Vec<Standing>, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;
        self.refresh_standings(&test).await
    }

    async fn refresh_standings(&self, test: &TestDefinition) -> Result<Vec<Standing>, EngineError> {
        let graded = self.graded_attempts(&test.id).await?;
        let entries: Vec<(String, f64)> = graded
            .iter()
            .filter_map(|attempt| {
                attempt.result.as_ref().map(|result| (attempt.id.clone(), result.0.percentage))
            })
            .collect();
        let standings = compute_standings(&entries);

        let now = self.now();
        let repo = self.attempts();
        for standing in &standings {
            let attempt_id = standing.attempt_id.as_str();
            let (rank, percentile) = (standing.rank, standing.percentile);
            let updated = retry_once("update_standings", move || {
                repo.update_standings(attempt_id, rank, percentile, now)
            })
            .await?;
            if !updated {
                tracing::warn!(attempt_id, "Standing not stored; attempt is no longer graded");
            }
        }

        tracing::info!(test_id = %test.id, ranked = standings.len(), "Standings recomputed");
        Ok(standings)
    }

    pub(crate) async fn export_results_csv(
        &self,
        test_id: &str,
        grader_email: &str,
    ) -> Result<String, EngineError> {
        let test = self.load_test(test_id).await?;
        self.ensure_manager(&test, grader_email).await?;

        let graded = self.graded_attempts(test_id).await?;
        let student_ids: Vec<String> = graded
            .iter()
            .map(|attempt| attempt.student_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles: HashMap<String, StudentProfile> = self
            .directory()
            .student_profiles(&student_ids)
            .await
            .map_err(|err| EngineError::internal("Failed to load student profiles", err))?
            .into_iter()
            .map(|profile| (profile.id.clone(), profile))
            .collect();

        Ok(render_results_csv(&graded, &profiles))
    }

    async fn closed_attempts(&self, test_id: &str) -> Result<Vec<TestAttempt>, EngineError> {
        let repo = self.attempts();
        retry_once("list_by_test", move || repo.list_by_test(test_id, &AttemptStatus::CLOSED)).await
    }

    async fn graded_attempts(&self, test_id: &str) -> Result<Vec<TestAttempt>, EngineError> {
        let repo = self.attempts();
        retry_once("list_by_test", move || repo.list_by_test(test_id, &[AttemptStatus::Graded]))
            .await
    }
}

fn ensure_awaiting_grading(attempt: &TestAttempt) -> Result<(), EngineError> {
    match attempt.status {
        AttemptStatus::Submitted | AttemptStatus::AutoSubmitted => Ok(()),
        AttemptStatus::InProgress => {
            Err(EngineError::InvalidState(format!("attempt {} is still in progress", attempt.id)))
        }
        AttemptStatus::Graded => {
            Err(EngineError::InvalidState(format!("attempt {} is already graded", attempt.id)))
        }
    }
}

fn answered_question_ids(attempts: &[TestAttempt]) -> Vec<String> {
    attempts
        .iter()
        .flat_map(|attempt| attempt.answers.iter())
        .filter(|answer| answer.answer.is_some() && answer.marks_awarded.is_none())
        .map(|answer| answer.question_id.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn question_order_ids(attempts: &[TestAttempt]) -> Vec<String> {
    attempts
        .iter()
        .flat_map(|attempt| attempt.question_order.0.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `ids` in test-definition order, unknown ids last.
fn ordered_ids(test: &TestDefinition, ids: &[String]) -> Vec<String> {
    let mut ordered: Vec<String> =
        test.question_ids().into_iter().filter(|id| ids.contains(id)).collect();
    for id in ids {
        if !ordered.contains(id) {
            ordered.push(id.clone());
        }
    }
    ordered
}
