use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::payloads::{AnswerKey, AnswerPayload, QuestionOption};
use crate::db::types::{AttemptStatus, QuestionType, TestMode, TestStatus};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct TestDefinition {
    pub(crate) id: String,
    pub(crate) company_id: String,
    pub(crate) title: String,
    pub(crate) mode: TestMode,
    pub(crate) status: TestStatus,
    pub(crate) sections: Json<Vec<SectionDefinition>>,
    pub(crate) start_time: Option<PrimitiveDateTime>,
    pub(crate) end_time: Option<PrimitiveDateTime>,
    pub(crate) available_from: Option<PrimitiveDateTime>,
    pub(crate) duration_minutes: Option<i32>,
    pub(crate) options: Json<TestOptions>,
    pub(crate) total_marks: f64,
    pub(crate) total_questions: i32,
    pub(crate) results_published: bool,
}

impl TestDefinition {
    pub(crate) fn question_ids(&self) -> Vec<String> {
        self.sections.0.iter().flat_map(|section| section.question_ids.iter().cloned()).collect()
    }

    pub(crate) fn strict_sections(&self) -> bool {
        self.mode.strict_sections(self.options.0.allow_review)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct SectionDefinition {
    pub(crate) title: String,
    pub(crate) question_ids: Vec<String>,
    #[serde(default)]
    pub(crate) time_limit_minutes: Option<i32>,
    #[serde(default)]
    pub(crate) instructions: Option<String>,
    #[serde(default = "default_can_go_back")]
    pub(crate) can_go_back: bool,
}

fn default_can_go_back() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TestOptions {
    #[serde(default)]
    pub(crate) randomize_questions: bool,
    #[serde(default)]
    pub(crate) randomize_options: bool,
    #[serde(default)]
    pub(crate) instant_feedback: bool,
    #[serde(default = "default_true")]
    pub(crate) allow_review: bool,
    #[serde(default)]
    pub(crate) show_results_after_completion: bool,
    #[serde(default = "default_max_attempts")]
    pub(crate) max_attempts: i32,
    #[serde(default)]
    pub(crate) passing_score: f64,
    /// Per-test override of the configured grade bands.
    #[serde(default)]
    pub(crate) grade_bands: Option<Vec<GradeBand>>,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            randomize_questions: false,
            randomize_options: false,
            instant_feedback: false,
            allow_review: true,
            show_results_after_completion: false,
            max_attempts: default_max_attempts(),
            passing_score: 0.0,
            grade_bands: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> i32 {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradeBand {
    pub(crate) min_percentage: f64,
    pub(crate) label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct QuestionSnapshot {
    pub(crate) id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) subject: Option<String>,
    pub(crate) prompt: String,
    pub(crate) options: Vec<QuestionOption>,
    pub(crate) answer_key: AnswerKey,
    pub(crate) max_marks: f64,
    pub(crate) explanation: Option<String>,
    pub(crate) solution: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct QuestionRow {
    pub(crate) id: String,
    pub(crate) question_type: QuestionType,
    pub(crate) subject: Option<String>,
    pub(crate) prompt: String,
    pub(crate) options: Json<Vec<QuestionOption>>,
    pub(crate) answer_key: Json<AnswerKey>,
    pub(crate) max_marks: f64,
    pub(crate) explanation: Option<String>,
    pub(crate) solution: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct StudentProfile {
    pub(crate) id: String,
    pub(crate) full_name: String,
    pub(crate) email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct TestAttempt {
    pub(crate) id: String,
    pub(crate) test_id: String,
    pub(crate) student_id: String,
    pub(crate) attempt_number: i32,
    pub(crate) status: AttemptStatus,
    pub(crate) started_at: PrimitiveDateTime,
    pub(crate) submitted_at: Option<PrimitiveDateTime>,
    pub(crate) expires_at: Option<PrimitiveDateTime>,
    pub(crate) section_expires_at: Option<PrimitiveDateTime>,
    pub(crate) question_order: Json<Vec<String>>,
    pub(crate) option_orders: Json<HashMap<String, Vec<String>>>,
    pub(crate) current_section_index: i32,
    pub(crate) sections: Json<Vec<AttemptSection>>,
    pub(crate) result: Option<Json<AttemptResult>>,
    pub(crate) auto_graded_at: Option<PrimitiveDateTime>,
    /// Bumped by every write to the attempt's marks.
    pub(crate) grading_version: i32,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) graded_by: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    #[sqlx(skip)]
    pub(crate) answers: Vec<AttemptAnswer>,
}

impl TestAttempt {
    pub(crate) fn answer(&self, question_id: &str) -> Option<&AttemptAnswer> {
        self.answers.iter().find(|answer| answer.question_id == question_id)
    }

    /// Index of the frozen section that holds `question_id`.
    pub(crate) fn section_of(&self, question_id: &str) -> Option<i32> {
        self.sections
            .0
            .iter()
            .find(|section| section.question_ids.iter().any(|id| id == question_id))
            .map(|section| section.index)
    }

    pub(crate) fn current_section(&self) -> Option<&AttemptSection> {
        self.sections.0.get(self.current_section_index as usize)
    }
}

/// Per-attempt section state; the question ids are frozen at start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AttemptSection {
    pub(crate) index: i32,
    pub(crate) title: String,
    pub(crate) instructions: Option<String>,
    pub(crate) question_ids: Vec<String>,
    pub(crate) time_limit_minutes: Option<i32>,
    pub(crate) can_go_back: bool,
    pub(crate) started_at: Option<PrimitiveDateTime>,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
    pub(crate) time_spent_seconds: i64,
    pub(crate) is_locked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct AttemptAnswer {
    pub(crate) attempt_id: String,
    pub(crate) question_id: String,
    pub(crate) answer: Option<Json<AnswerPayload>>,
    pub(crate) is_correct: Option<bool>,
    pub(crate) marks_awarded: Option<f64>,
    pub(crate) feedback: Option<String>,
    pub(crate) flagged: bool,
    pub(crate) graded_by: Option<String>,
    pub(crate) graded_at: Option<PrimitiveDateTime>,
    pub(crate) answered_at: Option<PrimitiveDateTime>,
    pub(crate) updated_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct AttemptResult {
    pub(crate) total_marks: f64,
    pub(crate) marks_obtained: f64,
    pub(crate) percentage: f64,
    pub(crate) grade: String,
    pub(crate) rank: Option<i32>,
    pub(crate) percentile: Option<f64>,
    pub(crate) section_scores: Vec<SectionScore>,
    pub(crate) subject_scores: Vec<SubjectScore>,
    pub(crate) objective_marks: f64,
    pub(crate) subjective_marks: f64,
    pub(crate) is_passing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SectionScore {
    pub(crate) section_index: i32,
    pub(crate) title: String,
    pub(crate) marks_obtained: f64,
    pub(crate) max_marks: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct SubjectScore {
    pub(crate) subject: String,
    pub(crate) marks_obtained: f64,
    pub(crate) max_marks: f64,
}
