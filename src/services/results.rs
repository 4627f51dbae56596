use std::collections::{BTreeMap, HashMap};

use crate::core::config::EngineSettings;
use crate::db::models::{
    AttemptResult, GradeBand, QuestionSnapshot, SectionScore, SubjectScore, TestAttempt,
    TestDefinition,
};

/// Letter bands and the manual-grade correctness threshold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GradingConfig {
    pub(crate) bands: Vec<GradeBand>,
    pub(crate) fallback: String,
    pub(crate) correct_threshold: f64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        let bands = [(90.0, "A*"), (80.0, "A"), (70.0, "B"), (60.0, "C"), (50.0, "D")]
            .into_iter()
            .map(|(min_percentage, label)| GradeBand { min_percentage, label: label.to_string() })
            .collect();
        Self { bands, fallback: "U".to_string(), correct_threshold: 0.0 }
    }
}

impl GradingConfig {
    pub(crate) fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            bands: settings.grade_bands.clone(),
            fallback: settings.grade_fallback.clone(),
            correct_threshold: settings.subjective_correct_threshold,
        }
    }

    /// Grade for `percentage`, using per-test bands when the test has them.
    pub(crate) fn grade_for(&self, percentage: f64, overrides: Option<&[GradeBand]>) -> String {
        let bands = overrides.filter(|bands| !bands.is_empty()).unwrap_or(self.bands.as_slice());
        bands
            .iter()
            .find(|band| percentage >= band.min_percentage)
            .map(|band| band.label.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

pub(crate) fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Aggregates the awarded marks of `attempt` using its frozen sections.
/// Unanswered and ungraded questions count as zero.
pub(crate) fn compute_result(
    test: &TestDefinition,
    attempt: &TestAttempt,
    questions: &HashMap<String, QuestionSnapshot>,
    config: &GradingConfig,
) -> AttemptResult {
    let marks_for = |question_id: &str| {
        attempt.answer(question_id).and_then(|answer| answer.marks_awarded).unwrap_or(0.0)
    };

    let mut objective_marks = 0.0;
    let mut subjective_marks = 0.0;
    let mut subjects: BTreeMap<String, (f64, f64)> = BTreeMap::new();

    for question_id in attempt.question_order.0.iter() {
        let marks = marks_for(question_id);
        let Some(question) = questions.get(question_id) else {
            objective_marks += marks;
            continue;
        };

        if question.question_type.is_objective() {
            objective_marks += marks;
        } else {
            subjective_marks += marks;
        }

        if let Some(subject) = &question.subject {
            let entry = subjects.entry(subject.clone()).or_insert((0.0, 0.0));
            entry.0 += marks;
            entry.1 += question.max_marks;
        }
    }

    let section_scores = attempt
        .sections
        .0
        .iter()
        .map(|section| SectionScore {
            section_index: section.index,
            title: section.title.clone(),
            marks_obtained: section.question_ids.iter().map(|id| marks_for(id)).sum(),
            max_marks: section
                .question_ids
                .iter()
                .filter_map(|id| questions.get(id))
                .map(|question| question.max_marks)
                .sum(),
        })
        .collect();

    let subject_scores = subjects
        .into_iter()
        .map(|(subject, (marks_obtained, max_marks))| SubjectScore {
            subject,
            marks_obtained,
            max_marks,
        })
        .collect();

    let marks_obtained = objective_marks + subjective_marks;
    let percentage =
        if test.total_marks > 0.0 { round1(marks_obtained / test.total_marks * 100.0) } else { 0.0 };
    let grade = config.grade_for(percentage, test.options.0.grade_bands.as_deref());

    AttemptResult {
        total_marks: test.total_marks,
        marks_obtained,
        percentage,
        grade,
        rank: None,
        percentile: None,
        section_scores,
        subject_scores,
        objective_marks,
        subjective_marks,
        is_passing: percentage >= test.options.0.passing_score,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Standing {
    pub(crate) attempt_id: String,
    pub(crate) rank: i32,
    pub(crate) percentile: f64,
}

/// Competition ranking by percentage, highest first. Ties share a rank and
/// the next distinct score takes its 1-based position.
pub(crate) fn compute_standings(entries: &[(String, f64)]) -> Vec<Standing> {
    let mut sorted: Vec<&(String, f64)> = entries.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let cohort = sorted.len() as f64;
    let mut standings = Vec::with_capacity(sorted.len());
    let mut rank = 0;
    let mut previous: Option<f64> = None;

    for (position, (attempt_id, percentage)) in sorted.into_iter().enumerate() {
        if previous != Some(*percentage) {
            rank = position as i32 + 1;
            previous = Some(*percentage);
        }
        let percentile = round1(100.0 * (cohort - f64::from(rank) + 1.0) / cohort);
        standings.push(Standing { attempt_id: attempt_id.clone(), rank, percentile });
    }

    standings
}
