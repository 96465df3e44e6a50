//! Summary statistics and data-quality reports.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::infer::{parse_datetime, ColumnType};
use crate::table::{Column, Dataset};

/// Number of most frequent values kept for categorical and text columns.
const TOP_VALUES: usize = 5;

/// Per-column summary statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSummary {
    pub column: String,
    pub column_type: ColumnType,
    pub count: usize,
    pub nulls: usize,
    pub distinct: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earliest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_values: Vec<(String, usize)>,
}

impl ColumnSummary {
    pub fn compute(column: &Column, column_type: ColumnType) -> Self {
        let nulls = column.null_count();
        let mut summary = ColumnSummary {
            column: column.name.clone(),
            column_type,
            count: column.len() - nulls,
            nulls,
            distinct: column.distinct_count(),
            min: None,
            max: None,
            mean: None,
            median: None,
            std_dev: None,
            earliest: None,
            latest: None,
            top_values: Vec::new(),
        };

        match column_type {
            ColumnType::Numeric => {
                let mut values: Vec<f64> = column.numbers().into_iter().flatten().collect();
                if !values.is_empty() {
                    values.sort_by(f64::total_cmp);
                    let mean = mean(&values);
                    summary.min = values.first().copied();
                    summary.max = values.last().copied();
                    summary.mean = Some(mean);
                    summary.median = Some(quantile(&values, 0.5));
                    summary.std_dev = Some(std_dev(&values, mean));
                }
            }
            ColumnType::Datetime => {
                let mut parsed: Vec<_> = column
                    .values
                    .iter()
                    .filter_map(|v| v.as_deref().and_then(parse_datetime))
                    .collect();
                parsed.sort();
                summary.earliest = parsed.first().map(|d| d.to_string());
                summary.latest = parsed.last().map(|d| d.to_string());
            }
            ColumnType::Categorical | ColumnType::Text => {
                summary.top_values = top_values(column, TOP_VALUES);
            }
        }

        summary
    }
}

/// Null and outlier observations for one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnQuality {
    pub column: String,
    pub column_type: ColumnType,
    pub nulls: usize,
    pub null_ratio: f64,
    pub outliers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_fence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_fence: Option<f64>,
}

/// Dataset-wide data-quality report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub rows: usize,
    pub duplicate_rows: usize,
    pub columns: Vec<ColumnQuality>,
}

impl QualityReport {
    pub fn compute(dataset: &Dataset) -> Self {
        let rows = dataset.row_count();
        let columns = dataset
            .schema()
            .iter()
            .filter_map(|schema| {
                let column = dataset.column(&schema.name)?;
                let null_ratio = if rows == 0 {
                    0.0
                } else {
                    schema.nulls as f64 / rows as f64
                };
                let (outliers, lower_fence, upper_fence) =
                    if schema.column_type == ColumnType::Numeric {
                        iqr_outliers(column)
                    } else {
                        (0, None, None)
                    };
                Some(ColumnQuality {
                    column: schema.name.clone(),
                    column_type: schema.column_type,
                    nulls: schema.nulls,
                    null_ratio,
                    outliers,
                    lower_fence,
                    upper_fence,
                })
            })
            .collect();

        QualityReport {
            rows,
            duplicate_rows: duplicate_rows(dataset),
            columns,
        }
    }

    pub fn total_nulls(&self) -> usize {
        self.columns.iter().map(|c| c.nulls).sum()
    }

    pub fn total_outliers(&self) -> usize {
        self.columns.iter().map(|c| c.outliers).sum()
    }
}

/// Count rows that repeat an earlier row exactly.
pub fn duplicate_rows(dataset: &Dataset) -> usize {
    let mut seen = HashSet::new();
    (0..dataset.row_count())
        .filter_map(|i| dataset.row(i))
        .filter(|row| !seen.insert(row.clone()))
        .count()
}

/// Outliers by the 1.5 x IQR rule, with the fences used.
fn iqr_outliers(column: &Column) -> (usize, Option<f64>, Option<f64>) {
    let mut values: Vec<f64> = column.numbers().into_iter().flatten().collect();
    if values.len() < 4 {
        return (0, None, None);
    }
    values.sort_by(f64::total_cmp);
    let q1 = quantile(&values, 0.25);
    let q3 = quantile(&values, 0.75);
    let iqr = q3 - q1;
    let lower = q1 - 1.5 * iqr;
    let upper = q3 + 1.5 * iqr;
    let count = values.iter().filter(|v| **v < lower || **v > upper).count();
    (count, Some(lower), Some(upper))
}

fn top_values(column: &Column, limit: usize) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in column.values.iter().filter_map(|v| v.as_deref()) {
        *counts.entry(value).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(limit);
    ranked
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1); zero for fewer than two values.
pub fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Linear-interpolated quantile over already sorted values.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let weight = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
