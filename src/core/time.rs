use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime, PrimitiveDateTime};

pub(crate) fn primitive_now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

pub(crate) fn format_primitive(value: PrimitiveDateTime) -> String {
    value.assume_utc().format(&Rfc3339).unwrap_or_else(|_| value.assume_utc().to_string())
}

pub(crate) fn add_minutes(value: PrimitiveDateTime, minutes: i32) -> PrimitiveDateTime {
    value + Duration::minutes(i64::from(minutes))
}

/// Whole seconds from `from` to `to`, clamped at zero.
pub(crate) fn seconds_between(from: PrimitiveDateTime, to: PrimitiveDateTime) -> i64 {
    (to - from).whole_seconds().max(0)
}

pub(crate) fn earliest(
    left: Option<PrimitiveDateTime>,
    right: Option<PrimitiveDateTime>,
) -> Option<PrimitiveDateTime> {
    match (left, right) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
