use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "attemptstatus", rename_all = "snake_case")]
pub(crate) enum AttemptStatus {
    InProgress,
    Submitted,
    AutoSubmitted,
    Graded,
}

impl AttemptStatus {
    pub(crate) const CLOSED: [AttemptStatus; 2] =
        [AttemptStatus::Submitted, AttemptStatus::AutoSubmitted];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Submitted => "submitted",
            Self::AutoSubmitted => "auto_submitted",
            Self::Graded => "graded",
        }
    }

    /// Closed but not yet graded.
    pub(crate) fn is_closed(self) -> bool {
        matches!(self, Self::Submitted | Self::AutoSubmitted)
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "testmode", rename_all = "snake_case")]
pub(crate) enum TestMode {
    LiveMock,
    AnytimeMock,
    Practice,
    Classroom,
    SectionTimed,
}

impl TestMode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::LiveMock => "live_mock",
            Self::AnytimeMock => "anytime_mock",
            Self::Practice => "practice",
            Self::Classroom => "classroom",
            Self::SectionTimed => "section_timed",
        }
    }

    /// Whether answering is restricted to the active section.
    pub(crate) fn strict_sections(self, allow_review: bool) -> bool {
        match self {
            Self::SectionTimed => true,
            Self::Practice => false,
            Self::LiveMock | Self::AnytimeMock | Self::Classroom => !allow_review,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "teststatus", rename_all = "lowercase")]
pub(crate) enum TestStatus {
    Draft,
    Scheduled,
    Live,
    Completed,
    Archived,
}

impl TestStatus {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Completed => "completed",
            Self::Archived => "archived",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "questiontype", rename_all = "snake_case")]
pub(crate) enum QuestionType {
    McqSingle,
    McqMulti,
    TrueFalse,
    Numeric,
    FillBlank,
    ShortAnswer,
    LongAnswer,
}

impl QuestionType {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::McqSingle => "mcq_single",
            Self::McqMulti => "mcq_multi",
            Self::TrueFalse => "true_false",
            Self::Numeric => "numeric",
            Self::FillBlank => "fill_blank",
            Self::ShortAnswer => "short_answer",
            Self::LongAnswer => "long_answer",
        }
    }

    pub(crate) fn is_objective(self) -> bool {
        !matches!(self, Self::ShortAnswer | Self::LongAnswer)
    }

    pub(crate) fn has_options(self) -> bool {
        matches!(self, Self::McqSingle | Self::McqMulti)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum NotificationKind {
    ResultsPublished,
}

impl NotificationKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ResultsPublished => "results_published",
        }
    }
}
