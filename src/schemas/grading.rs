use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::db::payloads::AnswerPayload;
use crate::db::types::QuestionType;
use crate::services::engine::{
    BulkGradeItem, BulkGradeReport, FinalizeReport, GradedAnswer, UngradedQuestion,
};
use crate::services::results::Standing;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    pub(crate) marks: f64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "feedback must be at most 5000 characters"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Validate)]
pub(crate) struct BulkGradeEntry {
    #[serde(alias = "attemptId")]
    #[validate(length(min = 1, message = "attempt_id must not be empty"))]
    pub(crate) attempt_id: String,
    pub(crate) marks: f64,
    #[serde(default)]
    #[validate(length(max = 5000, message = "feedback must be at most 5000 characters"))]
    pub(crate) feedback: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct BulkGradeRequest {
    #[validate(length(min = 1, max = 500, message = "grades must contain 1 to 500 entries"), nested)]
    pub(crate) grades: Vec<BulkGradeEntry>,
}

impl BulkGradeRequest {
    pub(crate) fn into_items(self) -> Vec<BulkGradeItem> {
        self.grades
            .into_iter()
            .map(|entry| BulkGradeItem {
                attempt_id: entry.attempt_id,
                marks: entry.marks,
                feedback: entry.feedback,
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct GradedAnswerResponse {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) marks: f64,
    pub(crate) is_correct: bool,
}

impl From<GradedAnswer> for GradedAnswerResponse {
    fn from(graded: GradedAnswer) -> Self {
        Self {
            attempt_id: graded.attempt_id,
            question_id: graded.question_id,
            marks: graded.marks,
            is_correct: graded.is_correct,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BulkGradeFailureResponse {
    pub(crate) attempt_id: String,
    pub(crate) code: &'static str,
    pub(crate) detail: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct BulkGradeResponse {
    pub(crate) graded: Vec<GradedAnswerResponse>,
    pub(crate) failures: Vec<BulkGradeFailureResponse>,
}

impl From<BulkGradeReport> for BulkGradeResponse {
    fn from(report: BulkGradeReport) -> Self {
        Self {
            graded: report.graded.into_iter().map(GradedAnswerResponse::from).collect(),
            failures: report
                .failures
                .into_iter()
                .map(|failure| BulkGradeFailureResponse {
                    attempt_id: failure.attempt_id,
                    code: failure.error.code(),
                    detail: failure.error.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct QueueAnswer {
    pub(crate) attempt_id: String,
    pub(crate) student_id: String,
    pub(crate) answer: AnswerPayload,
    pub(crate) flagged: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueueQuestion {
    pub(crate) question_id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) prompt: String,
    pub(crate) max_marks: f64,
    pub(crate) answers: Vec<QueueAnswer>,
}

#[derive(Debug, Serialize)]
pub(crate) struct GradingQueueResponse {
    pub(crate) pending_answers: usize,
    pub(crate) questions: Vec<QueueQuestion>,
}

impl From<Vec<UngradedQuestion>> for GradingQueueResponse {
    fn from(queue: Vec<UngradedQuestion>) -> Self {
        let questions: Vec<QueueQuestion> = queue
            .into_iter()
            .map(|entry| QueueQuestion {
                question_id: entry.question.id,
                question_type: entry.question.question_type,
                prompt: entry.question.prompt,
                max_marks: entry.question.max_marks,
                answers: entry
                    .answers
                    .into_iter()
                    .map(|answer| QueueAnswer {
                        attempt_id: answer.attempt_id,
                        student_id: answer.student_id,
                        answer: answer.answer,
                        flagged: answer.flagged,
                    })
                    .collect(),
            })
            .collect();

        Self {
            pending_answers: questions.iter().map(|question| question.answers.len()).sum(),
            questions,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StandingResponse {
    pub(crate) attempt_id: String,
    pub(crate) rank: i32,
    pub(crate) percentile: f64,
}

impl From<Standing> for StandingResponse {
    fn from(standing: Standing) -> Self {
        Self {
            attempt_id: standing.attempt_id,
            rank: standing.rank,
            percentile: standing.percentile,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StandingsResponse {
    pub(crate) standings: Vec<StandingResponse>,
}

impl From<Vec<Standing>> for StandingsResponse {
    fn from(standings: Vec<Standing>) -> Self {
        Self { standings: standings.into_iter().map(StandingResponse::from).collect() }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct FinalizeResponse {
    pub(crate) graded_attempts: usize,
    pub(crate) standings: Vec<StandingResponse>,
}

impl From<FinalizeReport> for FinalizeResponse {
    fn from(report: FinalizeReport) -> Self {
        Self {
            graded_attempts: report.graded_attempts,
            standings: report.standings.into_iter().map(StandingResponse::from).collect(),
        }
    }
}
