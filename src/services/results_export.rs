use std::collections::HashMap;

use crate::core::time::seconds_between;
use crate::db::models::{StudentProfile, TestAttempt};

pub(crate) const CSV_HEADER: &str = "Rank,Name,Email,Total Score,Percentage,Grade,Time Taken (min)";

fn csv_escape(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        let mut out = String::with_capacity(value.len() + 2);
        out.push('"');
        for ch in value.chars() {
            if ch == '"' {
                out.push('"');
            }
            out.push(ch);
        }
        out.push('"');
        out
    } else {
        value.to_string()
    }
}

/// Renders graded attempts as CSV ordered by rank; unranked rows go last.
pub(crate) fn render_results_csv(
    attempts: &[TestAttempt],
    profiles: &HashMap<String, StudentProfile>,
) -> String {
    let mut rows: Vec<&TestAttempt> =
        attempts.iter().filter(|attempt| attempt.result.is_some()).collect();
    rows.sort_by_key(|attempt| {
        let rank = attempt.result.as_ref().and_then(|result| result.0.rank).unwrap_or(i32::MAX);
        (rank, attempt.student_id.clone(), attempt.attempt_number)
    });

    let mut csv = String::from(CSV_HEADER);
    csv.push('\n');

    for attempt in rows {
        let Some(result) = attempt.result.as_ref().map(|result| &result.0) else {
            continue;
        };
        let profile = profiles.get(&attempt.student_id);
        let name = profile.map(|profile| profile.full_name.as_str()).unwrap_or("");
        let email = profile.map(|profile| profile.email.as_str()).unwrap_or("");
        let minutes = attempt
            .submitted_at
            .map(|submitted_at| seconds_between(attempt.started_at, submitted_at) as f64 / 60.0)
            .unwrap_or(0.0);

        let cells = [
            result.rank.map(|rank| rank.to_string()).unwrap_or_default(),
            csv_escape(name),
            csv_escape(email),
            result.marks_obtained.to_string(),
            format!("{:.1}", result.percentage),
            csv_escape(&result.grade),
            format!("{minutes:.1}"),
        ];
        csv.push_str(&cells.join(","));
        csv.push('\n');
    }

    csv
}
