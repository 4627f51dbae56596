use serde::{Deserialize, Serialize};

use crate::db::types::QuestionType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionOption {
    pub(crate) label: String,
    pub(crate) text: String,
}

/// A student's raw answer, tagged by question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnswerPayload {
    McqSingle { choice: String },
    McqMulti { choices: Vec<String> },
    TrueFalse { value: bool },
    Numeric { value: f64 },
    FillBlank { text: String },
    ShortAnswer { text: String },
    LongAnswer { text: String },
}

impl AnswerPayload {
    pub(crate) fn question_type(&self) -> QuestionType {
        match self {
            Self::McqSingle { .. } => QuestionType::McqSingle,
            Self::McqMulti { .. } => QuestionType::McqMulti,
            Self::TrueFalse { .. } => QuestionType::TrueFalse,
            Self::Numeric { .. } => QuestionType::Numeric,
            Self::FillBlank { .. } => QuestionType::FillBlank,
            Self::ShortAnswer { .. } => QuestionType::ShortAnswer,
            Self::LongAnswer { .. } => QuestionType::LongAnswer,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BlankMatching {
    /// Trimmed, case-insensitive comparison.
    #[default]
    Exact,
    ExactCaseSensitive,
    /// Each accepted entry is a pattern that must match the whole answer.
    Regex,
}

/// Canonical answer data supplied by the question bank.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum AnswerKey {
    McqSingle {
        correct: String,
    },
    McqMulti {
        correct: Vec<String>,
    },
    TrueFalse {
        correct: bool,
    },
    Numeric {
        value: f64,
        #[serde(default)]
        tolerance: f64,
    },
    FillBlank {
        accepted: Vec<String>,
        #[serde(default)]
        matching: BlankMatching,
    },
    ShortAnswer {
        #[serde(default)]
        model_answer: Option<String>,
    },
    LongAnswer {
        #[serde(default)]
        model_answer: Option<String>,
    },
}

impl AnswerKey {
    pub(crate) fn question_type(&self) -> QuestionType {
        match self {
            Self::McqSingle { .. } => QuestionType::McqSingle,
            Self::McqMulti { .. } => QuestionType::McqMulti,
            Self::TrueFalse { .. } => QuestionType::TrueFalse,
            Self::Numeric { .. } => QuestionType::Numeric,
            Self::FillBlank { .. } => QuestionType::FillBlank,
            Self::ShortAnswer { .. } => QuestionType::ShortAnswer,
            Self::LongAnswer { .. } => QuestionType::LongAnswer,
        }
    }
}
