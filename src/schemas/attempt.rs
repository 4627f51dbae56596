use serde::{Deserialize, Serialize};

use crate::core::time::format_primitive;
use crate::db::models::{AttemptResult, AttemptSection, QuestionSnapshot, TestAttempt};
use crate::db::payloads::{AnswerKey, AnswerPayload, QuestionOption};
use crate::db::types::{AttemptStatus, QuestionType, TestMode};
use crate::services::attempt_timing::remaining_seconds;
use crate::services::engine::{AnswerOutcome, FlagOutcome, ResultView, SessionView, SubmitOutcome};

#[derive(Debug, Deserialize)]
pub(crate) struct AnswerRequest {
    pub(crate) answer: AnswerPayload,
}

#[derive(Debug, Deserialize)]
pub(crate) struct FlagRequest {
    #[serde(default = "default_flagged")]
    pub(crate) flagged: bool,
}

fn default_flagged() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub(crate) struct SectionStateResponse {
    pub(crate) index: i32,
    pub(crate) title: String,
    pub(crate) instructions: Option<String>,
    pub(crate) question_ids: Vec<String>,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) can_go_back: bool,
    pub(crate) started_at: Option<String>,
    pub(crate) completed_at: Option<String>,
    pub(crate) time_spent_seconds: i64,
    pub(crate) is_locked: bool,
}

impl From<&AttemptSection> for SectionStateResponse {
    fn from(section: &AttemptSection) -> Self {
        Self {
            index: section.index,
            title: section.title.clone(),
            instructions: section.instructions.clone(),
            question_ids: section.question_ids.clone(),
            time_limit_minutes: section.time_limit_minutes,
            can_go_back: section.can_go_back,
            started_at: section.started_at.map(format_primitive),
            completed_at: section.completed_at.map(format_primitive),
            time_spent_seconds: section.time_spent_seconds,
            is_locked: section.is_locked,
        }
    }
}

/// Question content without answer keys, explanations or solutions.
#[derive(Debug, Serialize)]
pub(crate) struct SessionQuestion {
    pub(crate) id: String,
    pub(crate) section_index: i32,
    pub(crate) question_type: QuestionType,
    pub(crate) subject: Option<String>,
    pub(crate) prompt: String,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) max_marks: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct SavedAnswerResponse {
    pub(crate) question_id: String,
    pub(crate) answer: Option<AnswerPayload>,
    pub(crate) flagged: bool,
    pub(crate) answered_at: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttemptSessionResponse {
    pub(crate) attempt_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) test_id: String,
    pub(crate) mode: TestMode,
    pub(crate) status: AttemptStatus,
    pub(crate) resumed: bool,
    pub(crate) started_at: String,
    pub(crate) expires_at: Option<String>,
    pub(crate) section_expires_at: Option<String>,
    pub(crate) remaining_seconds: Option<i64>,
    pub(crate) section_remaining_seconds: Option<i64>,
    pub(crate) current_section_index: i32,
    pub(crate) sections: Vec<SectionStateResponse>,
    pub(crate) questions: Vec<SessionQuestion>,
    pub(crate) answers: Vec<SavedAnswerResponse>,
}

impl AttemptSessionResponse {
    pub(crate) fn from_view(view: &SessionView, resumed: bool) -> Self {
        let attempt = &view.attempt;

        let questions = attempt
            .sections
            .0
            .iter()
            .flat_map(|section| {
                section.question_ids.iter().map(move |id| (section.index, id))
            })
            .filter_map(|(section_index, id)| {
                let question = view.questions.get(id)?;
                Some(SessionQuestion {
                    id: question.id.clone(),
                    section_index,
                    question_type: question.question_type,
                    subject: question.subject.clone(),
                    prompt: question.prompt.clone(),
                    options: ordered_options(attempt, question),
                    max_marks: question.max_marks,
                })
            })
            .collect();

        let answers = attempt
            .answers
            .iter()
            .map(|answer| SavedAnswerResponse {
                question_id: answer.question_id.clone(),
                answer: answer.answer.as_ref().map(|payload| payload.0.clone()),
                flagged: answer.flagged,
                answered_at: answer.answered_at.map(format_primitive),
            })
            .collect();

        Self {
            attempt_id: attempt.id.clone(),
            attempt_number: attempt.attempt_number,
            test_id: attempt.test_id.clone(),
            mode: view.test.mode,
            status: attempt.status,
            resumed,
            started_at: format_primitive(attempt.started_at),
            expires_at: attempt.expires_at.map(format_primitive),
            section_expires_at: attempt.section_expires_at.map(format_primitive),
            remaining_seconds: remaining_seconds(attempt.expires_at, view.now),
            section_remaining_seconds: remaining_seconds(attempt.section_expires_at, view.now),
            current_section_index: attempt.current_section_index,
            sections: attempt.sections.0.iter().map(SectionStateResponse::from).collect(),
            questions,
            answers,
        }
    }
}

/// Options in the attempt's frozen order; labels missing from it keep
/// their bank order at the end.
fn ordered_options(attempt: &TestAttempt, question: &QuestionSnapshot) -> Vec<QuestionOption> {
    let Some(order) = attempt.option_orders.0.get(&question.id) else {
        return question.options.clone();
    };

    let mut options: Vec<QuestionOption> = order
        .iter()
        .filter_map(|label| question.options.iter().find(|option| &option.label == label))
        .cloned()
        .collect();
    options.extend(
        question.options.iter().filter(|option| !order.contains(&option.label)).cloned(),
    );
    options
}

#[derive(Debug, Serialize)]
pub(crate) struct InstantFeedbackResponse {
    pub(crate) is_correct: bool,
    pub(crate) marks_awarded: f64,
    pub(crate) max_marks: f64,
}

#[derive(Debug, Serialize)]
pub(crate) struct AnswerResponse {
    pub(crate) question_id: String,
    pub(crate) saved_at: String,
    pub(crate) feedback: Option<InstantFeedbackResponse>,
}

impl From<AnswerOutcome> for AnswerResponse {
    fn from(outcome: AnswerOutcome) -> Self {
        Self {
            question_id: outcome.question_id,
            saved_at: format_primitive(outcome.saved_at),
            feedback: outcome.feedback.map(|feedback| InstantFeedbackResponse {
                is_correct: feedback.is_correct,
                marks_awarded: feedback.marks_awarded,
                max_marks: feedback.max_marks,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct FlagResponse {
    pub(crate) question_id: String,
    pub(crate) flagged: bool,
}

impl From<FlagOutcome> for FlagResponse {
    fn from(outcome: FlagOutcome) -> Self {
        Self { question_id: outcome.question_id, flagged: outcome.flagged }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SubmitResponse {
    pub(crate) attempt_id: String,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: Option<String>,
    pub(crate) already_closed: bool,
}

impl From<SubmitOutcome> for SubmitResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        Self {
            attempt_id: outcome.attempt.id,
            status: outcome.attempt.status,
            submitted_at: outcome.attempt.submitted_at.map(format_primitive),
            already_closed: outcome.already_closed,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ReviewItem {
    pub(crate) question_id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) prompt: String,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) answer: Option<AnswerPayload>,
    pub(crate) correct_answer: AnswerKey,
    pub(crate) is_correct: Option<bool>,
    pub(crate) marks_awarded: Option<f64>,
    pub(crate) max_marks: f64,
    pub(crate) feedback: Option<String>,
    pub(crate) explanation: Option<String>,
    pub(crate) solution: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ResultResponse {
    pub(crate) attempt_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) submitted_at: Option<String>,
    pub(crate) results_visible: bool,
    pub(crate) result: Option<AttemptResult>,
    pub(crate) review: Option<Vec<ReviewItem>>,
}

impl From<ResultView> for ResultResponse {
    fn from(view: ResultView) -> Self {
        let attempt = &view.attempt;

        let review = view.review.then(|| {
            attempt
                .question_order
                .0
                .iter()
                .filter_map(|id| {
                    let question = view.questions.get(id)?;
                    let answer = attempt.answer(id);
                    Some(ReviewItem {
                        question_id: question.id.clone(),
                        question_type: question.question_type,
                        prompt: question.prompt.clone(),
                        options: ordered_options(attempt, question),
                        answer: answer.and_then(|answer| answer.answer.as_ref()).map(|payload| payload.0.clone()),
                        correct_answer: question.answer_key.clone(),
                        is_correct: answer.and_then(|answer| answer.is_correct),
                        marks_awarded: answer.and_then(|answer| answer.marks_awarded),
                        max_marks: question.max_marks,
                        feedback: answer.and_then(|answer| answer.feedback.clone()),
                        explanation: question.explanation.clone(),
                        solution: question.solution.clone(),
                    })
                })
                .collect()
        });

        let result = if view.visible {
            attempt.result.as_ref().map(|result| result.0.clone())
        } else {
            None
        };

        Self {
            attempt_id: attempt.id.clone(),
            attempt_number: attempt.attempt_number,
            status: attempt.status,
            submitted_at: attempt.submitted_at.map(format_primitive),
            results_visible: view.visible,
            result,
            review,
        }
    }
}
