//! Grouping and aggregation helpers shared by the query and chart handlers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabletalk_dataset::infer::parse_number;
use tabletalk_dataset::{ColumnType, Dataset};

/// Aggregation function applied per group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    Count,
    Sum,
    Mean,
    Min,
    Max,
}

impl Aggregate {
    pub const NAMES: [&'static str; 5] = ["count", "sum", "mean", "min", "max"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregate::Count => "count",
            Aggregate::Sum => "sum",
            Aggregate::Mean => "mean",
            Aggregate::Min => "min",
            Aggregate::Max => "max",
        }
    }

    /// Apply to a group's values. `Count` counts values; the others need at
    /// least one value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        match self {
            Aggregate::Count => Some(values.len() as f64),
            _ if values.is_empty() => None,
            Aggregate::Sum => Some(values.iter().sum()),
            Aggregate::Mean => Some(values.iter().sum::<f64>() / values.len() as f64),
            Aggregate::Min => values.iter().copied().reduce(f64::min),
            Aggregate::Max => values.iter().copied().reduce(f64::max),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Aggregate {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Aggregate::Count),
            "sum" => Ok(Aggregate::Sum),
            "mean" | "avg" | "average" => Ok(Aggregate::Mean),
            "min" => Ok(Aggregate::Min),
            "max" => Ok(Aggregate::Max),
            _ => Err(format!("Unknown aggregate: {}", s)),
        }
    }
}

/// One group's key, row count, and aggregated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub key: String,
    pub rows: usize,
    pub value: Option<f64>,
}

/// Group the rows selected by `rows` by `group_by` and aggregate `target`.
///
/// Null group keys are skipped. Without a target, `Count` counts rows and
/// other aggregates yield `None`. Groups are returned in first-seen order.
pub fn group_rows(
    dataset: &Dataset,
    rows: &[usize],
    group_by: &str,
    target: Option<&str>,
    aggregate: Aggregate,
) -> Vec<Group> {
    let Some(key_column) = dataset.column(group_by) else {
        return Vec::new();
    };
    let target_column = target.and_then(|t| dataset.column(t));

    let mut order: Vec<&str> = Vec::new();
    let mut buckets: HashMap<&str, (usize, Vec<f64>)> = HashMap::new();
    for &row in rows {
        let Some(key) = key_column.get(row) else {
            continue;
        };
        let bucket = buckets.entry(key).or_insert_with(|| {
            order.push(key);
            (0, Vec::new())
        });
        bucket.0 += 1;
        match target_column {
            Some(column) => {
                if let Some(v) = column.get(row).and_then(parse_number) {
                    bucket.1.push(v);
                }
            }
            None => bucket.1.push(1.0),
        }
    }

    order
        .into_iter()
        .filter_map(|key| {
            let (count, values) = buckets.remove(key)?;
            let value = if target_column.is_none() && aggregate != Aggregate::Count {
                None
            } else {
                aggregate.apply(&values)
            };
            Some(Group {
                key: key.to_string(),
                rows: count,
                value,
            })
        })
        .collect()
}

/// Equal-width histogram bins over `values`, labelled `lo-hi`.
pub fn histogram(values: &[f64], bins: usize) -> Vec<(String, usize)> {
    if values.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![(format_number(min), values.len())];
    }
    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in values {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| {
            let lo = min + width * i as f64;
            let hi = lo + width;
            (format!("{}-{}", format_number(lo), format_number(hi)), count)
        })
        .collect()
}

/// Render a number compactly: integers without a fraction, others to 2 places.
pub fn format_number(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{:.2}", v)
    }
}

/// A cell as JSON, numeric for numeric columns.
pub fn cell_value(raw: Option<&str>, column_type: ColumnType) -> Value {
    match raw {
        None => Value::Null,
        Some(s) if column_type == ColumnType::Numeric => parse_number(s)
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(s.to_string())),
        Some(s) => Value::String(s.to_string()),
    }
}

/// JSON number for an optional float; `null` for missing or non-finite.
pub fn number_value(v: Option<f64>) -> Value {
    v.and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
