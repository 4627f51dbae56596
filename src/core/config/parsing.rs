use std::env;

use super::types::{ConfigError, Environment};
use crate::db::models::GradeBand;

const DEFAULT_CORS_ORIGINS: &[&str] =
    &["http://localhost:5173", "http://localhost:3000", "http://localhost:8080"];

pub(super) const DEFAULT_GRADE_BANDS: &str = "90:A*,80:A,70:B,60:C,50:D";

pub(super) fn env_optional(key: &str) -> Option<String> {
    env::var(key).ok().map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

pub(super) fn env_or_default(key: &str, default: &str) -> String {
    env_optional(key).unwrap_or_else(|| default.to_string())
}

pub(super) fn parse_u16(field: &'static str, value: String) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u32(field: &'static str, value: String) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_u64(field: &'static str, value: String) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidValue { field, value })
}

pub(super) fn parse_fraction(field: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.parse::<f64>() {
        Ok(parsed) if (0.0..1.0).contains(&parsed) => Ok(parsed),
        _ => Err(ConfigError::InvalidValue { field, value }),
    }
}

pub(super) fn parse_cors_origins(value: Option<String>) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = value else {
        return Ok(default_cors_origins());
    };

    if raw.trim_start().starts_with('[') {
        let parsed: Vec<String> =
            serde_json::from_str(&raw).map_err(|_| ConfigError::InvalidCors(raw.clone()))?;
        if parsed.is_empty() {
            return Ok(default_cors_origins());
        }
        return Ok(parsed);
    }

    let items: Vec<String> = raw
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    if items.is_empty() {
        return Ok(default_cors_origins());
    }

    Ok(items)
}

/// Parses `min:label` pairs such as `90:A*,80:A`. Bands must be strictly
/// descending and within 0..=100.
pub(super) fn parse_grade_bands(raw: &str) -> Result<Vec<GradeBand>, ConfigError> {
    let mut bands = Vec::new();

    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (min, label) = item
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidGradeBands(format!("missing ':' in {item}")))?;
        let min_percentage: f64 = min
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidGradeBands(format!("bad percentage in {item}")))?;
        let label = label.trim();

        if label.is_empty() {
            return Err(ConfigError::InvalidGradeBands(format!("empty label in {item}")));
        }
        if !(0.0..=100.0).contains(&min_percentage) {
            return Err(ConfigError::InvalidGradeBands(format!("{min_percentage} out of range")));
        }
        if let Some(previous) = bands.last().map(|band: &GradeBand| band.min_percentage) {
            if min_percentage >= previous {
                return Err(ConfigError::InvalidGradeBands(format!(
                    "{min_percentage} is not below {previous}"
                )));
            }
        }

        bands.push(GradeBand { min_percentage, label: label.to_string() });
    }

    if bands.is_empty() {
        return Err(ConfigError::InvalidGradeBands(raw.to_string()));
    }

    Ok(bands)
}

pub(super) fn parse_bool(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON")
}

pub(super) fn parse_environment(value: Option<String>) -> Environment {
    match value.as_deref().map(|item| item.to_lowercase()) {
        Some(ref val) if val == "production" || val == "prod" => Environment::Production,
        Some(ref val) if val == "staging" => Environment::Staging,
        Some(ref val) if val == "test" || val == "testing" => Environment::Test,
        _ => Environment::Development,
    }
}

fn default_cors_origins() -> Vec<String> {
    DEFAULT_CORS_ORIGINS.iter().map(|item| item.to_string()).collect()
}
