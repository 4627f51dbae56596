use regex::Regex;

use crate::db::models::QuestionSnapshot;
use crate::db::payloads::{AnswerKey, AnswerPayload, BlankMatching};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ObjectiveScore {
    pub(crate) is_correct: bool,
    pub(crate) marks: f64,
}

/// Checks that `payload` is a well-formed answer to `question`.
pub(crate) fn validate_answer(
    question: &QuestionSnapshot,
    payload: &AnswerPayload,
) -> Result<(), String> {
    if payload.question_type() != question.question_type {
        return Err(format!(
            "expected a {} answer, got {}",
            question.question_type.as_str(),
            payload.question_type().as_str()
        ));
    }

    let known = |label: &str| question.options.iter().any(|option| option.label == label);

    match payload {
        AnswerPayload::McqSingle { choice } => {
            if !known(choice) {
                return Err(format!("unknown option {choice}"));
            }
        }
        AnswerPayload::McqMulti { choices } => {
            if let Some(choice) = choices.iter().find(|choice| !known(choice)) {
                return Err(format!("unknown option {choice}"));
            }
        }
        AnswerPayload::Numeric { value } => {
            if !value.is_finite() {
                return Err("numeric answer must be finite".to_string());
            }
        }
        AnswerPayload::TrueFalse { .. }
        | AnswerPayload::FillBlank { .. }
        | AnswerPayload::ShortAnswer { .. }
        | AnswerPayload::LongAnswer { .. } => {}
    }

    Ok(())
}

/// Scores an objective answer against the canonical key. Subjective
/// questions and mismatched payloads yield `None`.
pub(crate) fn score_objective(
    question: &QuestionSnapshot,
    payload: &AnswerPayload,
) -> Option<ObjectiveScore> {
    let is_correct = match (&question.answer_key, payload) {
        (AnswerKey::McqSingle { correct }, AnswerPayload::McqSingle { choice }) => correct == choice,
        (AnswerKey::McqMulti { correct }, AnswerPayload::McqMulti { choices }) => {
            let mut expected: Vec<&str> = correct.iter().map(String::as_str).collect();
            let mut given: Vec<&str> = choices.iter().map(String::as_str).collect();
            expected.sort_unstable();
            expected.dedup();
            given.sort_unstable();
            given.dedup();
            expected == given
        }
        (AnswerKey::TrueFalse { correct }, AnswerPayload::TrueFalse { value }) => correct == value,
        (AnswerKey::Numeric { value: expected, tolerance }, AnswerPayload::Numeric { value }) => {
            (value - expected).abs() <= tolerance.abs() + f64::EPSILON * expected.abs().max(1.0)
        }
        (AnswerKey::FillBlank { accepted, matching }, AnswerPayload::FillBlank { text }) => {
            blank_matches(&question.id, accepted, *matching, text)
        }
        _ => return None,
    };

    Some(ObjectiveScore { is_correct, marks: if is_correct { question.max_marks } else { 0.0 } })
}

fn blank_matches(question_id: &str, accepted: &[String], matching: BlankMatching, text: &str) -> bool {
    let answer = text.trim();
    match matching {
        BlankMatching::Exact => {
            let answer = answer.to_lowercase();
            accepted.iter().any(|candidate| candidate.trim().to_lowercase() == answer)
        }
        BlankMatching::ExactCaseSensitive => {
            accepted.iter().any(|candidate| candidate.trim() == answer)
        }
        BlankMatching::Regex => accepted.iter().any(|pattern| {
            match Regex::new(&format!("^(?:{pattern})$")) {
                Ok(regex) => regex.is_match(answer),
                Err(err) => {
                    tracing::warn!(
                        question_id,
                        pattern = %pattern,
                        error = %err,
                        "Invalid fill-blank pattern; treating as no match"
                    );
                    false
                }
            }
        }),
    }
}

/// Correctness reported for a manually graded answer.
pub(crate) fn derive_is_correct(marks: f64, max_marks: f64, threshold: f64) -> bool {
    marks > threshold * max_marks
}
