//! Column type inference.
//!
//! A column is numeric when at least 95% of its non-null values parse as
//! numbers, datetime when at least 90% match one of the fixed date patterns,
//! otherwise categorical when its distinct-value ratio is below 0.5, else
//! free text. Datetime is checked before numeric so the more specific type
//! wins when both thresholds are met.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Minimum share of non-null values that must parse as numbers.
pub const NUMERIC_THRESHOLD: f64 = 0.95;
/// Minimum share of non-null values that must match a date pattern.
pub const DATETIME_THRESHOLD: f64 = 0.90;
/// Distinct/non-null ratio below which a column is categorical.
pub const CATEGORICAL_DISTINCT_RATIO: f64 = 0.5;

const NULL_TOKENS: &[&str] = &["", "na", "n/a", "null", "none", "nan", "-"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y", "%d.%m.%Y", "%b %d, %Y", "%d %b %Y"];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Inferred logical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Numeric,
    Categorical,
    Datetime,
    Text,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Numeric => write!(f, "numeric"),
            ColumnType::Categorical => write!(f, "categorical"),
            ColumnType::Datetime => write!(f, "datetime"),
            ColumnType::Text => write!(f, "text"),
        }
    }
}

impl std::str::FromStr for ColumnType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "numeric" => Ok(ColumnType::Numeric),
            "categorical" => Ok(ColumnType::Categorical),
            "datetime" => Ok(ColumnType::Datetime),
            "text" => Ok(ColumnType::Text),
            _ => Err(format!("Unknown column type: {}", s)),
        }
    }
}

/// Whether a raw cell counts as missing.
pub fn is_null_token(raw: &str) -> bool {
    let trimmed = raw.trim();
    NULL_TOKENS
        .iter()
        .any(|token| trimmed.eq_ignore_ascii_case(token))
}

/// Parse a cell as a finite number.
///
/// Accepts a leading currency symbol and `,` thousands separators.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    let unsigned = trimmed
        .strip_prefix('$')
        .or_else(|| trimmed.strip_prefix('€'))
        .or_else(|| trimmed.strip_prefix('£'))
        .unwrap_or(trimmed);
    let cleaned: String = unsigned.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a cell against the fixed set of date and datetime patterns.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

/// Infer the logical type of a column from its cells (`None` = null).
pub fn infer_column_type(values: &[Option<String>]) -> ColumnType {
    let present: Vec<&str> = values.iter().filter_map(|v| v.as_deref()).collect();
    if present.is_empty() {
        return ColumnType::Text;
    }
    let total = present.len() as f64;

    let dates = present.iter().filter(|v| parse_datetime(v).is_some()).count();
    if dates as f64 / total >= DATETIME_THRESHOLD {
        return ColumnType::Datetime;
    }

    let numbers = present.iter().filter(|v| parse_number(v).is_some()).count();
    if numbers as f64 / total >= NUMERIC_THRESHOLD {
        return ColumnType::Numeric;
    }

    let distinct: HashSet<&str> = present.iter().copied().collect();
    if (distinct.len() as f64 / total) < CATEGORICAL_DISTINCT_RATIO {
        ColumnType::Categorical
    } else {
        ColumnType::Text
    }
}
