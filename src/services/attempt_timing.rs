use time::PrimitiveDateTime;

use crate::core::time::{add_minutes, earliest, seconds_between};
use crate::db::models::{AttemptSection, TestAttempt, TestDefinition};
use crate::db::types::{TestMode, TestStatus};

/// Why a test cannot be started right now.
pub(crate) fn start_window_violation(test: &TestDefinition, now: PrimitiveDateTime) -> Option<String> {
    let status_ok = match test.mode {
        TestMode::AnytimeMock => matches!(test.status, TestStatus::Scheduled | TestStatus::Live),
        _ => test.status == TestStatus::Live,
    };
    if !status_ok {
        return Some(format!("test is {}, not open for attempts", test.status.as_str()));
    }

    let opens_at = match test.mode {
        TestMode::AnytimeMock => test.available_from.or(test.start_time),
        TestMode::LiveMock => test.start_time,
        TestMode::Practice | TestMode::Classroom | TestMode::SectionTimed => None,
    };
    if let Some(opens_at) = opens_at {
        if now < opens_at {
            return Some("test window has not opened yet".to_string());
        }
    }

    if test.mode != TestMode::Practice {
        if let Some(end_time) = test.end_time {
            if now >= end_time {
                return Some("test window has closed".to_string());
            }
        }
    }

    None
}

/// Hard deadline for a whole attempt started at `started_at`.
pub(crate) fn attempt_deadline(
    test: &TestDefinition,
    started_at: PrimitiveDateTime,
) -> Option<PrimitiveDateTime> {
    let by_duration = test.duration_minutes.map(|minutes| add_minutes(started_at, minutes));
    match test.mode {
        TestMode::Practice => by_duration,
        _ => earliest(by_duration, test.end_time),
    }
}

/// End of a section-timed section that started at `started_at`.
pub(crate) fn section_deadline(
    section: &AttemptSection,
    started_at: PrimitiveDateTime,
    attempt_deadline: Option<PrimitiveDateTime>,
) -> Option<PrimitiveDateTime> {
    let by_limit = section.time_limit_minutes.map(|minutes| add_minutes(started_at, minutes));
    earliest(by_limit, attempt_deadline)
}

pub(crate) fn remaining_seconds(
    deadline: Option<PrimitiveDateTime>,
    now: PrimitiveDateTime,
) -> Option<i64> {
    deadline.map(|deadline| seconds_between(now, deadline))
}

fn complete_section(section: &mut AttemptSection, at: PrimitiveDateTime) {
    if section.completed_at.is_none() {
        if let Some(started_at) = section.started_at {
            section.time_spent_seconds = seconds_between(started_at, at);
        }
        section.completed_at = Some(at);
    }
    section.is_locked = true;
}

/// Section state after the attempt closes at `at`: the active section is
/// completed and every section is locked.
pub(crate) fn sections_for_close(
    sections: &[AttemptSection],
    current_index: i32,
    at: PrimitiveDateTime,
) -> Vec<AttemptSection> {
    let mut sections = sections.to_vec();
    for section in sections.iter_mut() {
        if section.index == current_index {
            complete_section(section, at);
        }
        section.is_locked = true;
    }
    sections
}

/// Section state after moving from `current_index` to `target_index` at `at`.
/// Returns the new sections and the deadline of the new active section
/// when sections are individually timed.
pub(crate) fn sections_for_advance(
    sections: &[AttemptSection],
    current_index: i32,
    target_index: i32,
    at: PrimitiveDateTime,
    attempt_deadline: Option<PrimitiveDateTime>,
    timed_sections: bool,
) -> (Vec<AttemptSection>, Option<PrimitiveDateTime>) {
    let mut sections = sections.to_vec();
    let mut section_expires_at = None;

    for section in sections.iter_mut() {
        if section.index >= current_index && section.index < target_index {
            if section.started_at.is_none() {
                section.started_at = Some(at);
            }
            complete_section(section, at);
        } else if section.index == target_index {
            section.started_at = Some(at);
            if timed_sections {
                section_expires_at = section_deadline(section, at, attempt_deadline);
            }
        }
    }

    (sections, section_expires_at)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ExpiryPlan {
    Active,
    Advance {
        new_index: i32,
        sections: Vec<AttemptSection>,
        section_expires_at: Option<PrimitiveDateTime>,
    },
    Close {
        submitted_at: PrimitiveDateTime,
        sections: Vec<AttemptSection>,
    },
}

/// Decides what an in-progress attempt must become at `now`. Expired
/// sections are closed at their own deadlines, so time spent reflects the
/// limit rather than the moment the expiry was noticed.
pub(crate) fn plan_expiry(
    attempt: &TestAttempt,
    timed_sections: bool,
    now: PrimitiveDateTime,
) -> ExpiryPlan {
    if timed_sections {
        if let Some(deadline) = attempt.section_expires_at.filter(|deadline| *deadline <= now) {
            return walk_expired_sections(attempt, deadline, now);
        }
    }

    match attempt.expires_at {
        Some(deadline) if deadline <= now => ExpiryPlan::Close {
            submitted_at: deadline,
            sections: sections_for_close(
                &attempt.sections.0,
                attempt.current_section_index,
                deadline,
            ),
        },
        _ => ExpiryPlan::Active,
    }
}

fn walk_expired_sections(
    attempt: &TestAttempt,
    mut deadline: PrimitiveDateTime,
    now: PrimitiveDateTime,
) -> ExpiryPlan {
    let mut sections = attempt.sections.0.clone();
    let mut index = attempt.current_section_index;
    let last_index = sections.len() as i32 - 1;

    loop {
        let attempt_over = attempt.expires_at.is_some_and(|end| deadline >= end);
        if index >= last_index || attempt_over {
            return ExpiryPlan::Close {
                submitted_at: deadline,
                sections: sections_for_close(&sections, index, deadline),
            };
        }

        let (next, next_deadline) =
            sections_for_advance(&sections, index, index + 1, deadline, attempt.expires_at, true);
        sections = next;
        index += 1;

        match next_deadline {
            Some(next_deadline) if next_deadline <= now => deadline = next_deadline,
            section_expires_at => {
                return ExpiryPlan::Advance { new_index: index, sections, section_expires_at };
            }
        }
    }
}
