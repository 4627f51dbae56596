use std::collections::HashMap;

use time::PrimitiveDateTime;
use uuid::Uuid;

use super::{retry_once, EngineError, ExamEngine};
use crate::db::models::{AttemptSection, QuestionSnapshot, TestAttempt, TestDefinition};
use crate::db::payloads::AnswerPayload;
use crate::db::types::{AttemptStatus, TestMode};
use crate::repositories::attempts::{NewAttempt, SectionGuard, StartInsert};
use crate::services::attempt_timing::{
    attempt_deadline, plan_expiry, section_deadline, sections_for_advance, sections_for_close,
    start_window_violation, ExpiryPlan,
};
use crate::services::ordering::{attempt_seed, build_ordering};
use crate::services::scoring::{score_objective, validate_answer};

/// An attempt together with everything needed to render it.
#[derive(Debug, Clone)]
pub(crate) struct SessionView {
    pub(crate) test: TestDefinition,
    pub(crate) attempt: TestAttempt,
    pub(crate) questions: HashMap<String, QuestionSnapshot>,
    pub(crate) now: PrimitiveDateTime,
}

#[derive(Debug, Clone)]
pub(crate) struct StartOutcome {
    /// True when an in-progress attempt was returned instead of a new one.
    pub(crate) resumed: bool,
    pub(crate) session: SessionView,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct InstantFeedback {
    pub(crate) is_correct: bool,
    pub(crate) marks_awarded: f64,
    pub(crate) max_marks: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct AnswerOutcome {
    pub(crate) question_id: String,
    pub(crate) saved_at: PrimitiveDateTime,
    pub(crate) feedback: Option<InstantFeedback>,
}

#[derive(Debug, Clone)]
pub(crate) struct FlagOutcome {
    pub(crate) question_id: String,
    pub(crate) flagged: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct SubmitOutcome {
    pub(crate) attempt: TestAttempt,
    /// The attempt had already been closed by an earlier or concurrent call.
    pub(crate) already_closed: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultView {
    pub(crate) test: TestDefinition,
    pub(crate) attempt: TestAttempt,
    pub(crate) questions: HashMap<String, QuestionSnapshot>,
    /// Marks may be shown.
    pub(crate) visible: bool,
    /// Correct answers, explanations and solutions may be shown.
    pub(crate) review: bool,
}

impl ExamEngine {
    /// Starts a new attempt, or resumes the in-progress one.
    pub(crate) async fn start_attempt(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> Result<StartOutcome, EngineError> {
        let test = self.load_test(test_id).await?;

        if let Some(outcome) = self.try_start(&test, student_id).await? {
            return Ok(outcome);
        }

        tracing::warn!(test_id, student_id, "Attempt number claimed concurrently; retrying start");
        self.try_start(&test, student_id)
            .await?
            .ok_or_else(|| EngineError::Internal("Could not allocate an attempt number".to_string()))
    }

    async fn try_start(
        &self,
        test: &TestDefinition,
        student_id: &str,
    ) -> Result<Option<StartOutcome>, EngineError> {
        let repo = self.attempts();
        let test_id = test.id.as_str();

        let existing =
            retry_once("find_in_progress", move || repo.find_in_progress(test_id, student_id))
                .await?;
        if let Some(existing) = existing {
            let attempt = self.enforce_deadlines(test, existing).await?;
            if attempt.status == AttemptStatus::InProgress {
                tracing::info!(test_id, student_id, attempt_id = %attempt.id, "Resuming attempt");
                return self.resume(test, attempt).await.map(Some);
            }
        }

        let now = self.now();
        if let Some(reason) = start_window_violation(test, now) {
            return Err(EngineError::InvalidState(reason));
        }

        let definitions = &test.sections.0;
        let question_ids = test.question_ids();
        if question_ids.is_empty() {
            return Err(EngineError::InvalidState("test has no questions".to_string()));
        }
        if test.mode == TestMode::SectionTimed
            && definitions.iter().any(|section| section.time_limit_minutes.is_none())
        {
            return Err(EngineError::InvalidState(
                "every section of a section-timed test needs a time limit".to_string(),
            ));
        }

        let options = &test.options.0;
        let taken =
            retry_once("count_for_student", move || repo.count_for_student(test_id, student_id))
                .await?;
        if options.max_attempts > 0 && taken >= i64::from(options.max_attempts) {
            return Err(EngineError::AttemptLimitExceeded {
                test_id: test.id.clone(),
                max_attempts: options.max_attempts,
            });
        }
        let attempt_number = taken as i32 + 1;

        let questions = self.require_questions(&question_ids).await?;
        let ordering = build_ordering(
            attempt_seed(test_id, student_id, attempt_number),
            definitions,
            &questions,
            options.randomize_questions,
            options.randomize_options,
        );

        let expires_at = attempt_deadline(test, now);
        let sections: Vec<AttemptSection> = definitions
            .iter()
            .zip(ordering.sections.iter())
            .enumerate()
            .map(|(index, (definition, ids))| AttemptSection {
                index: index as i32,
                title: definition.title.clone(),
                instructions: definition.instructions.clone(),
                question_ids: ids.clone(),
                time_limit_minutes: definition.time_limit_minutes,
                can_go_back: definition.can_go_back,
                started_at: (index == 0).then_some(now),
                completed_at: None,
                time_spent_seconds: 0,
                is_locked: false,
            })
            .collect();
        let section_expires_at = match (test.mode, sections.first()) {
            (TestMode::SectionTimed, Some(first)) => section_deadline(first, now, expires_at),
            _ => None,
        };

        let new_attempt = NewAttempt {
            id: Uuid::new_v4().to_string(),
            test_id: test.id.clone(),
            student_id: student_id.to_string(),
            attempt_number,
            started_at: now,
            expires_at,
            section_expires_at,
            question_order: ordering.question_order(),
            option_orders: ordering.option_orders,
            sections,
        };
        let new_attempt = &new_attempt;

        match retry_once("insert_attempt", move || repo.insert_attempt(new_attempt.clone())).await? {
            StartInsert::Inserted(attempt) => {
                metrics::counter!("attempts_started_total").increment(1);
                tracing::info!(
                    test_id,
                    student_id,
                    attempt_id = %attempt.id,
                    attempt_number,
                    mode = test.mode.as_str(),
                    "Attempt started"
                );
                Ok(Some(StartOutcome {
                    resumed: false,
                    session: SessionView { test: test.clone(), attempt, questions, now },
                }))
            }
            StartInsert::InProgressExists(attempt) => self.resume(test, attempt).await.map(Some),
            StartInsert::NumberTaken => Ok(None),
        }
    }

    async fn resume(
        &self,
        test: &TestDefinition,
        attempt: TestAttempt,
    ) -> Result<StartOutcome, EngineError> {
        let session = self.session_view(test, attempt).await?;
        Ok(StartOutcome { resumed: true, session })
    }

    async fn session_view(
        &self,
        test: &TestDefinition,
        attempt: TestAttempt,
    ) -> Result<SessionView, EngineError> {
        let questions = self.load_questions(&attempt.question_order.0).await?;
        Ok(SessionView { test: test.clone(), attempt, questions, now: self.now() })
    }

    pub(crate) async fn get_session(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> Result<SessionView, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = self.active_attempt(&test, student_id).await?;
        self.session_view(&test, attempt).await
    }

    /// The in-progress attempt for the pair once passed deadlines are applied.
    async fn active_attempt(
        &self,
        test: &TestDefinition,
        student_id: &str,
    ) -> Result<TestAttempt, EngineError> {
        let repo = self.attempts();
        let test_id = test.id.as_str();

        let found =
            retry_once("find_in_progress", move || repo.find_in_progress(test_id, student_id))
                .await?;
        let attempt = match found {
            Some(attempt) => self.enforce_deadlines(test, attempt).await?,
            None => retry_once("find_latest", move || repo.find_latest(test_id, student_id))
                .await?
                .ok_or_else(|| EngineError::not_found("attempt", format!("for test {test_id}")))?,
        };

        if attempt.status != AttemptStatus::InProgress {
            return Err(EngineError::AttemptClosed { attempt_id: attempt.id, status: attempt.status });
        }
        Ok(attempt)
    }

    pub(crate) async fn save_answer(
        &self,
        test_id: &str,
        student_id: &str,
        question_id: &str,
        payload: AnswerPayload,
    ) -> Result<AnswerOutcome, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = self.active_attempt(&test, student_id).await?;
        let (section_index, guard) = write_guard(&test, &attempt, question_id)?;

        let mut questions = self.require_questions(&[question_id.to_string()]).await?;
        let question = questions
            .remove(question_id)
            .ok_or_else(|| EngineError::not_found("question", question_id))?;
        validate_answer(&question, &payload).map_err(|reason| EngineError::InvalidAnswer {
            question_id: question_id.to_string(),
            reason,
        })?;

        let now = self.now();
        let repo = self.attempts();
        let attempt_id = attempt.id.as_str();
        let stored = &payload;
        let saved = retry_once("upsert_answer", move || {
            repo.upsert_answer(attempt_id, question_id, stored, guard, now)
        })
        .await?;
        if !saved {
            return Err(self.explain_rejected_write(&test, attempt_id, question_id, section_index).await);
        }

        metrics::counter!("answers_recorded_total").increment(1);
        tracing::debug!(test_id, attempt_id, question_id, "Answer saved");

        let feedback = if test.mode == TestMode::Practice && test.options.0.instant_feedback {
            score_objective(&question, &payload).map(|score| InstantFeedback {
                is_correct: score.is_correct,
                marks_awarded: score.marks,
                max_marks: question.max_marks,
            })
        } else {
            None
        };

        Ok(AnswerOutcome { question_id: question_id.to_string(), saved_at: now, feedback })
    }

    pub(crate) async fn flag_question(
        &self,
        test_id: &str,
        student_id: &str,
        question_id: &str,
        flagged: bool,
    ) -> Result<FlagOutcome, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = self.active_attempt(&test, student_id).await?;
        let (section_index, guard) = write_guard(&test, &attempt, question_id)?;

        let now = self.now();
        let repo = self.attempts();
        let attempt_id = attempt.id.as_str();
        let saved = retry_once("set_flag", move || {
            repo.set_flag(attempt_id, question_id, flagged, guard, now)
        })
        .await?;
        if !saved {
            return Err(self.explain_rejected_write(&test, attempt_id, question_id, section_index).await);
        }

        tracing::debug!(test_id, attempt_id, question_id, flagged, "Question flag updated");
        Ok(FlagOutcome { question_id: question_id.to_string(), flagged })
    }

    /// Works out why a guarded write matched no row.
    async fn explain_rejected_write(
        &self,
        test: &TestDefinition,
        attempt_id: &str,
        question_id: &str,
        question_section: i32,
    ) -> EngineError {
        let attempt = match self.reload(attempt_id).await {
            Ok(attempt) => attempt,
            Err(err) => return err,
        };
        let attempt = match self.enforce_deadlines(test, attempt).await {
            Ok(attempt) => attempt,
            Err(err) => return err,
        };

        if attempt.status != AttemptStatus::InProgress {
            return EngineError::AttemptClosed { attempt_id: attempt.id, status: attempt.status };
        }
        EngineError::SectionMismatch {
            question_id: question_id.to_string(),
            question_section,
            current_section: attempt.current_section_index,
        }
    }

    pub(crate) async fn advance_section(
        &self,
        test_id: &str,
        student_id: &str,
        target: i32,
    ) -> Result<SessionView, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = self.active_attempt(&test, student_id).await?;
        let current = attempt.current_section_index;

        if target < 0 || target as usize >= attempt.sections.0.len() {
            return Err(EngineError::not_found("section", target.to_string()));
        }
        if target == current {
            return self.session_view(&test, attempt).await;
        }
        if target < current {
            return Err(EngineError::ReviewNotAllowed { current, target });
        }
        if target != current + 1 {
            return Err(EngineError::CannotSkipSections { current, target });
        }

        let now = self.now();
        let (sections, section_expires_at) = sections_for_advance(
            &attempt.sections.0,
            current,
            target,
            now,
            attempt.expires_at,
            test.mode == TestMode::SectionTimed,
        );

        let repo = self.attempts();
        let attempt_id = attempt.id.as_str();
        let sections = &sections;
        let moved = retry_once("advance_sections", move || {
            repo.advance_sections(attempt_id, current, target, sections, section_expires_at, now)
        })
        .await?;

        let reloaded = self.reload(attempt_id).await?;
        if !moved {
            if reloaded.status != AttemptStatus::InProgress {
                return Err(EngineError::AttemptClosed {
                    attempt_id: reloaded.id,
                    status: reloaded.status,
                });
            }
            if reloaded.current_section_index != target {
                return Err(EngineError::InvalidState(
                    "section changed while advancing; reload the session".to_string(),
                ));
            }
        } else {
            tracing::info!(test_id, student_id, attempt_id, from = current, to = target, "Section advanced");
        }

        self.session_view(&test, reloaded).await
    }

    pub(crate) async fn submit(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = match self.closable_attempt(&test, student_id).await? {
            Ok(attempt) => attempt,
            Err(closed) => return Ok(closed),
        };

        let now = self.now();
        let timed = test.mode == TestMode::SectionTimed;
        let attempt = match plan_expiry(&attempt, timed, now) {
            ExpiryPlan::Active => attempt,
            ExpiryPlan::Advance { .. } => {
                let advanced = self.enforce_deadlines(&test, attempt).await?;
                if advanced.status != AttemptStatus::InProgress {
                    return Ok(SubmitOutcome { attempt: advanced, already_closed: true });
                }
                advanced
            }
            ExpiryPlan::Close { submitted_at, sections } => {
                return self
                    .close(&test, attempt, AttemptStatus::AutoSubmitted, submitted_at, sections)
                    .await;
            }
        };

        let sections = sections_for_close(&attempt.sections.0, attempt.current_section_index, now);
        self.close(&test, attempt, AttemptStatus::Submitted, now, sections).await
    }

    /// Applies whatever the attempt's passed deadlines require: advancing
    /// past expired sections or closing the attempt.
    pub(crate) async fn auto_submit(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> Result<SubmitOutcome, EngineError> {
        let test = self.load_test(test_id).await?;
        let attempt = match self.closable_attempt(&test, student_id).await? {
            Ok(attempt) => attempt,
            Err(closed) => return Ok(closed),
        };

        match plan_expiry(&attempt, test.mode == TestMode::SectionTimed, self.now()) {
            ExpiryPlan::Active => {
                Err(EngineError::InvalidState("attempt deadline has not passed".to_string()))
            }
            ExpiryPlan::Advance { .. } => {
                let attempt = self.enforce_deadlines(&test, attempt).await?;
                Ok(SubmitOutcome { attempt, already_closed: false })
            }
            ExpiryPlan::Close { submitted_at, sections } => {
                self.close(&test, attempt, AttemptStatus::AutoSubmitted, submitted_at, sections)
                    .await
            }
        }
    }

    /// The in-progress attempt, or the outcome to report when the latest
    /// attempt is already closed.
    async fn closable_attempt(
        &self,
        test: &TestDefinition,
        student_id: &str,
    ) -> Result<Result<TestAttempt, SubmitOutcome>, EngineError> {
        let repo = self.attempts();
        let test_id = test.id.as_str();

        let found =
            retry_once("find_in_progress", move || repo.find_in_progress(test_id, student_id))
                .await?;
        if let Some(attempt) = found {
            return Ok(Ok(attempt));
        }

        let latest = retry_once("find_latest", move || repo.find_latest(test_id, student_id))
            .await?
            .ok_or_else(|| EngineError::not_found("attempt", format!("for test {test_id}")))?;
        Ok(Err(SubmitOutcome { attempt: latest, already_closed: true }))
    }

    async fn close(
        &self,
        test: &TestDefinition,
        attempt: TestAttempt,
        status: AttemptStatus,
        submitted_at: PrimitiveDateTime,
        sections: Vec<AttemptSection>,
    ) -> Result<SubmitOutcome, EngineError> {
        let now = self.now();
        let repo = self.attempts();
        let attempt_id = attempt.id.as_str();
        let sections = &sections;
        let closed = retry_once("close_attempt", move || {
            repo.close_attempt(attempt_id, status, submitted_at, sections, now)
        })
        .await?;

        if !closed {
            tracing::info!(attempt_id, "Attempt already closed by a concurrent call");
            let attempt = self.reload(attempt_id).await?;
            return Ok(SubmitOutcome { attempt, already_closed: true });
        }

        metrics::counter!("attempts_closed_total", "status" => status.as_str()).increment(1);
        if status == AttemptStatus::AutoSubmitted {
            metrics::counter!("expired_attempts_closed_total").increment(1);
        }
        tracing::info!(
            test_id = %test.id,
            student_id = %attempt.student_id,
            attempt_id,
            status = status.as_str(),
            "Attempt closed"
        );

        if let Err(err) = self.settle_closed(test, attempt_id).await {
            tracing::warn!(attempt_id, error = %err, "Settling closed attempt failed; the settle loop will retry");
        }
        let attempt = self.reload(attempt_id).await?;
        Ok(SubmitOutcome { attempt, already_closed: false })
    }

    /// Lazy deadline enforcement; returns the attempt as it stands afterwards.
    pub(super) async fn enforce_deadlines(
        &self,
        test: &TestDefinition,
        attempt: TestAttempt,
    ) -> Result<TestAttempt, EngineError> {
        if attempt.status != AttemptStatus::InProgress {
            return Ok(attempt);
        }

        let now = self.now();
        match plan_expiry(&attempt, test.mode == TestMode::SectionTimed, now) {
            ExpiryPlan::Active => Ok(attempt),
            ExpiryPlan::Advance { new_index, sections, section_expires_at } => {
                let repo = self.attempts();
                let attempt_id = attempt.id.as_str();
                let current = attempt.current_section_index;
                let sections = &sections;
                let moved = retry_once("advance_sections", move || {
                    repo.advance_sections(
                        attempt_id,
                        current,
                        new_index,
                        sections,
                        section_expires_at,
                        now,
                    )
                })
                .await?;

                if moved {
                    metrics::counter!("sections_auto_advanced_total")
                        .increment(u64::try_from(new_index - current).unwrap_or(0));
                    tracing::info!(attempt_id, from = current, to = new_index, "Expired section auto-advanced");
                }
                self.reload(attempt_id).await
            }
            ExpiryPlan::Close { submitted_at, sections } => {
                let outcome = self
                    .close(test, attempt, AttemptStatus::AutoSubmitted, submitted_at, sections)
                    .await?;
                Ok(outcome.attempt)
            }
        }
    }

    /// Latest attempt for the pair with what may be shown of its result.
    pub(crate) async fn get_result(
        &self,
        test_id: &str,
        student_id: &str,
    ) -> Result<ResultView, EngineError> {
        let test = self.load_test(test_id).await?;
        let repo = self.attempts();
        let latest = retry_once("find_latest", move || repo.find_latest(test_id, student_id))
            .await?
            .ok_or_else(|| EngineError::not_found("attempt", format!("for test {test_id}")))?;
        let attempt = self.enforce_deadlines(&test, latest).await?;

        let options = &test.options.0;
        let graded = attempt.status == AttemptStatus::Graded;
        let visible = graded && (options.show_results_after_completion || test.results_published);
        let review = visible && options.allow_review;
        let questions = if review {
            self.load_questions(&attempt.question_order.0).await?
        } else {
            HashMap::new()
        };

        Ok(ResultView { test, attempt, questions, visible, review })
    }
}

/// Section of `question_id` and the constraint its write must satisfy.
fn write_guard(
    test: &TestDefinition,
    attempt: &TestAttempt,
    question_id: &str,
) -> Result<(i32, SectionGuard), EngineError> {
    let section_index = attempt
        .section_of(question_id)
        .ok_or_else(|| EngineError::not_found("question", question_id))?;
    let current = attempt.current_section_index;
    let mismatch = || EngineError::SectionMismatch {
        question_id: question_id.to_string(),
        question_section: section_index,
        current_section: current,
    };

    if test.strict_sections() {
        if section_index != current {
            return Err(mismatch());
        }
        return Ok((section_index, SectionGuard::Exactly(current)));
    }

    let can_go_back = attempt
        .sections
        .0
        .get(section_index as usize)
        .map_or(true, |section| section.can_go_back);
    if can_go_back {
        return Ok((section_index, SectionGuard::Any));
    }
    if current > section_index {
        return Err(mismatch());
    }
    Ok((section_index, SectionGuard::AtMost(section_index)))
}
